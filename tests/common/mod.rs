//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use proxyfleet::clock::ManualClock;
use proxyfleet::config::EngineConfig;
use proxyfleet::gateway::{
    ClientHandle, ClientSpec, GatewayError, GatewayResult, PanelGateway, TrafficUsage,
};
use proxyfleet::models::{PanelEndpoint, ProxyServer, ServerId, ServerRecord, ServerSpec};
use proxyfleet::repository::{MemoryStore, Repositories, ServerRepository};
use proxyfleet::{EngineDeps, FleetEngine, Result};

/// Panel whose answers are set per server by the test
#[derive(Default)]
pub struct ScriptedGateway {
    down: DashSet<ServerId>,
    refusing: DashSet<ServerId>,
    traffic: DashMap<ServerId, TrafficUsage>,
    next_client: AtomicU64,
    pub created: Mutex<Vec<(ServerId, String)>>,
    pub deleted: Mutex<Vec<(ServerId, String)>>,
    pub resets: Mutex<Vec<ServerId>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, id: ServerId) {
        self.down.insert(id);
    }

    pub fn set_up(&self, id: ServerId) {
        self.down.remove(&id);
    }

    /// Make `create_client` fail on this server
    pub fn refuse_clients(&self, id: ServerId) {
        self.refusing.insert(id);
    }

    pub fn set_traffic(&self, id: ServerId, up: u64, down: u64) {
        self.traffic.insert(id, TrafficUsage { up, down });
    }
}

#[async_trait]
impl PanelGateway for ScriptedGateway {
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool> {
        if self.down.contains(&server.id) {
            Err(GatewayError::Connectivity(format!("server {} down", server.id)))
        } else {
            Ok(true)
        }
    }

    async fn create_client(
        &self,
        server: &ProxyServer,
        spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle> {
        if self.refusing.contains(&server.id) {
            return Err(GatewayError::Auth("panel credentials rejected".into()));
        }
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        let handle = format!("{}-{}", spec.subscriber_id, n);
        self.created.lock().push((server.id, handle.clone()));
        Ok(ClientHandle(handle))
    }

    async fn delete_client(&self, server: &ProxyServer, handle: &ClientHandle) -> GatewayResult<()> {
        self.deleted.lock().push((server.id, handle.0.clone()));
        Ok(())
    }

    async fn query_traffic(
        &self,
        server: &ProxyServer,
        _handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage> {
        Ok(self
            .traffic
            .get(&server.id)
            .map(|t| *t)
            .unwrap_or_default())
    }

    async fn reset_traffic(&self, server: &ProxyServer) -> GatewayResult<()> {
        self.resets.lock().push(server.id);
        self.traffic.remove(&server.id);
        Ok(())
    }
}

/// Server table whose deletes pause until the test lets them through
pub struct GatedServers {
    inner: Arc<MemoryStore>,
    pub entered: Notify,
    pub proceed: Notify,
}

impl GatedServers {
    /// Repositories over one memory store, with server deletes gated
    pub fn repositories() -> (Repositories, Arc<GatedServers>) {
        let store = Arc::new(MemoryStore::new());
        let gated = Arc::new(GatedServers {
            inner: store.clone(),
            entered: Notify::new(),
            proceed: Notify::new(),
        });
        let mut repositories = Repositories::from_store(store);
        repositories.servers = gated.clone();
        (repositories, gated)
    }
}

#[async_trait]
impl ServerRepository for GatedServers {
    async fn upsert_server(&self, record: &ServerRecord) -> Result<()> {
        self.inner.upsert_server(record).await
    }

    async fn delete_server(&self, id: ServerId) -> Result<bool> {
        self.entered.notify_one();
        self.proceed.notified().await;
        self.inner.delete_server(id).await
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        self.inner.list_servers().await
    }
}

pub fn spec(id: ServerId, region: Option<&str>) -> ServerSpec {
    ServerSpec {
        id,
        panel: PanelEndpoint {
            vendor: "scripted".to_string(),
            url: Url::parse(&format!("https://panel-{}.fleet.test:2053", id)).unwrap(),
        },
        region: region.map(str::to_string),
        capacity: 50,
    }
}

/// Engine over in-memory repositories, a scripted panel and a manual clock
pub struct TestFleet {
    pub engine: Arc<FleetEngine>,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: Arc<ManualClock>,
}

impl TestFleet {
    pub async fn new() -> Self {
        Self::with_repositories(Repositories::in_memory()).await
    }

    pub async fn with_repositories(repositories: Repositories) -> Self {
        let gateway = Arc::new(ScriptedGateway::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));

        let mut config = EngineConfig::default();
        config.health.panel_rate_limit_per_second = 10_000;

        let deps = EngineDeps::new(repositories, gateway.clone()).with_clock(clock.clone());
        let engine = Arc::new(FleetEngine::build(config, deps).await.unwrap());

        Self {
            engine,
            gateway,
            clock,
        }
    }

    /// Register servers `1..=count` and probe them once so they are Healthy
    pub async fn with_healthy_servers(count: i64) -> Self {
        let fleet = Self::new().await;
        for id in 1..=count {
            fleet.engine.register_server(spec(id, None)).await.unwrap();
        }
        fleet.engine.monitor().run_cycle().await;
        fleet
    }

    pub async fn probe_all(&self, times: usize) {
        for _ in 0..times {
            self.engine.monitor().run_cycle().await;
        }
    }
}
