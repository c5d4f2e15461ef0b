//! Fleet engine: wires the components together and exposes the operation API
//!
//! Every operation answers with an `Envelope`. The `Result<Envelope>` form
//! lets the HTTP layer keep the error's status code; `Envelope::settle`
//! collapses it for callers that only want the envelope.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::analytics::{AnalyticsHandle, PerformanceAnalytics};
use crate::balancer::LoadBalancer;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{FleetError, Result};
use crate::fleet::{event_channel, EventSender, ServerRegistry};
use crate::gateway::{ClientHandle, DeadlineGateway, PanelGateway, RateLimitedGateway};
use crate::health::{
    AlertSink, HealthMonitor, HealthMonitorHandle, RemediationHook, Remediator, TracingAlertSink,
};
use crate::models::{
    AnalyticsSnapshot, Envelope, FleetEvent, LoadBalancingPolicy, ProxyAssignment, ProxyServer,
    RotationPolicy, ServerAnalytics, ServerId, ServerRecord, ServerSpec, ServerStatus,
    SubscriberConfig, TimeRange, TrafficSample,
};
use crate::repository::Repositories;
use crate::rotation::{RotationHandle, RotationOutcome, RotationReason, RotationScheduler};
use crate::services::{RetentionHandle, RetentionService};
use crate::store::ConfigurationStore;

/// Days ahead projected in analytics snapshots
pub const FORECAST_HORIZON_DAYS: u32 = 7;

/// External collaborators the engine is built from
#[derive(Clone)]
pub struct EngineDeps {
    pub repositories: Repositories,
    pub gateway: Arc<dyn PanelGateway>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<dyn AlertSink>,
    pub remediation: Option<Arc<dyn RemediationHook>>,
}

impl EngineDeps {
    pub fn new(repositories: Repositories, gateway: Arc<dyn PanelGateway>) -> Self {
        Self {
            repositories,
            gateway,
            clock: Arc::new(SystemClock),
            alerts: Arc::new(TracingAlertSink),
            remediation: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_remediation(mut self, hook: Arc<dyn RemediationHook>) -> Self {
        self.remediation = Some(hook);
        self
    }
}

/// Live request outcome reported by the calling layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestReport {
    pub server_id: ServerId,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub bytes: u64,
}

/// Parameters accepted by `manage_proxy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManageParams {
    pub affinity_key: Option<String>,
    pub server_id: Option<ServerId>,
}

/// Administrative actions on a subscriber's proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyAction {
    Assign,
    Provision,
    Rotate,
    Release,
    Status,
    QueryTraffic,
    ResetTraffic,
    SetOffline,
    BringOnline,
}

impl ProxyAction {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "assign" => Ok(ProxyAction::Assign),
            "provision" => Ok(ProxyAction::Provision),
            "rotate" => Ok(ProxyAction::Rotate),
            "release" => Ok(ProxyAction::Release),
            "status" => Ok(ProxyAction::Status),
            "query_traffic" => Ok(ProxyAction::QueryTraffic),
            "reset_traffic" => Ok(ProxyAction::ResetTraffic),
            "set_offline" => Ok(ProxyAction::SetOffline),
            "bring_online" => Ok(ProxyAction::BringOnline),
            other => Err(FleetError::Configuration(format!(
                "unknown proxy action '{}'",
                other
            ))),
        }
    }
}

/// Fleet-wide summary
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub servers: Vec<ServerRecord>,
    pub status_counts: HashMap<ServerStatus, usize>,
    pub active_assignments: usize,
    pub sticky_sessions: usize,
    pub dropped_samples: u64,
}

/// Traffic counters for one provisioned client
#[derive(Debug, Clone, Serialize)]
pub struct ClientTraffic {
    pub server_id: ServerId,
    pub affinity_key: Option<String>,
    pub client: String,
    pub up: u64,
    pub down: u64,
    pub total: u64,
}

pub struct FleetEngine {
    config: EngineConfig,
    repos: Repositories,
    registry: Arc<ServerRegistry>,
    store: Arc<ConfigurationStore>,
    gateway: Arc<dyn PanelGateway>,
    rate_limiter: Arc<RateLimitedGateway>,
    analytics: Arc<PerformanceAnalytics>,
    monitor: Arc<HealthMonitor>,
    balancer: Arc<LoadBalancer>,
    rotation: Arc<RotationScheduler>,
    retention: Arc<RetentionService>,
    events: EventSender,
    clock: Arc<dyn Clock>,
}

impl FleetEngine {
    /// Hydrate state from the repositories and assemble the components
    pub async fn build(config: EngineConfig, deps: EngineDeps) -> Result<Self> {
        let repos = deps.repositories;
        let clock = deps.clock;
        let events = event_channel();

        let store = Arc::new(ConfigurationStore::load(repos.policies.clone()).await?);

        let registry = Arc::new(ServerRegistry::new());
        for record in repos.servers.list_servers().await? {
            registry.insert(ProxyServer::from_record(record))?;
        }

        // Load counters are recounted from the assignments actually active
        let active = repos.assignments.all_active().await?;
        for server in registry.all() {
            let load = active.iter().filter(|a| a.server_id == server.id).count();
            server.set_load(load as u32);
        }

        let rate_limiter = Arc::new(RateLimitedGateway::new(
            deps.gateway,
            config.health.panel_rate_limit_per_second,
        ));
        let gateway: Arc<dyn PanelGateway> = Arc::new(DeadlineGateway::new(
            rate_limiter.clone(),
            config.health.probe_timeout,
        ));

        let analytics = Arc::new(PerformanceAnalytics::new(
            config.analytics.clone(),
            repos.performance.clone(),
            clock.clone(),
        ));

        let remediator = Remediator::new(
            deps.remediation,
            config.health.remediation_max_attempts,
            Duration::from_std(config.health.remediation_cooldown)
                .unwrap_or_else(|_| Duration::minutes(15)),
        );
        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            registry.clone(),
            gateway.clone(),
            repos.health_checks.clone(),
            repos.servers.clone(),
            analytics.clone(),
            deps.alerts,
            remediator,
            events.clone(),
            clock.clone(),
        ));

        let balancer = Arc::new(LoadBalancer::new(
            config.balancer.clone(),
            registry.clone(),
            analytics.clone(),
            repos.assignments.clone(),
            gateway.clone(),
            events.clone(),
            clock.clone(),
        ));
        balancer.restore_sticky(&active);

        let rotation = Arc::new(RotationScheduler::new(
            config.rotation.clone(),
            store.clone(),
            balancer.clone(),
            analytics.clone(),
            repos.assignments.clone(),
            registry.clone(),
            events.clone(),
            clock.clone(),
        ));

        let retention = Arc::new(RetentionService::new(
            repos.health_checks.clone(),
            repos.performance.clone(),
            clock.clone(),
            config.analytics.health_check_retention,
            config.analytics.retention_interval,
        ));

        info!(
            servers = registry.len(),
            active_assignments = active.len(),
            subscribers = store.snapshot().len(),
            "Fleet engine ready"
        );

        Ok(Self {
            config,
            repos,
            registry,
            store,
            gateway,
            rate_limiter,
            analytics,
            monitor,
            balancer,
            rotation,
            retention,
            events,
            clock,
        })
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    pub fn analytics(&self) -> &Arc<PerformanceAnalytics> {
        &self.analytics
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn rotation(&self) -> &Arc<RotationScheduler> {
        &self.rotation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    #[instrument(skip(self, spec), fields(server_id = spec.id))]
    pub async fn register_server(&self, spec: ServerSpec) -> Result<ServerRecord> {
        if spec.capacity == 0 {
            return Err(FleetError::Configuration(
                "server capacity must be positive".into(),
            ));
        }

        let server = self.registry.insert(ProxyServer::new(spec))?;
        let record = server.record();
        if let Err(e) = self.repos.servers.upsert_server(&record).await {
            self.registry.remove(server.id);
            return Err(e);
        }

        info!(vendor = %server.panel.vendor, capacity = server.capacity, "Registered server");
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn decommission_server(&self, server_id: ServerId) -> Result<ServerRecord> {
        let server = self
            .registry
            .get(server_id)
            .ok_or_else(|| FleetError::NotFound(format!("server {}", server_id)))?;

        // A draining server takes no new slots while the checks below run
        match server.begin_drain() {
            Ok(()) => {}
            Err(0) => {
                return Err(FleetError::Configuration(format!(
                    "server {} is already being decommissioned",
                    server_id
                )))
            }
            Err(held) => {
                return Err(FleetError::Configuration(format!(
                    "server {} still has {} active assignments",
                    server_id, held
                )))
            }
        }

        let active = match self.repos.assignments.count_active_on_server(server_id).await {
            Ok(active) => active,
            Err(e) => {
                server.end_drain();
                return Err(e);
            }
        };
        if active > 0 {
            server.end_drain();
            return Err(FleetError::Configuration(format!(
                "server {} still has {} active assignments",
                server_id, active
            )));
        }

        if let Err(e) = self.repos.servers.delete_server(server_id).await {
            server.end_drain();
            return Err(e);
        }
        self.registry.remove(server_id);
        self.analytics.forget_server(server_id);
        self.rate_limiter.forget(server_id);

        info!("Decommissioned server");
        Ok(server.record())
    }

    pub fn servers(&self) -> Vec<ServerRecord> {
        self.registry.all().iter().map(|s| s.record()).collect()
    }

    pub async fn fleet_status(&self) -> Result<FleetStatus> {
        Ok(FleetStatus {
            servers: self.servers(),
            status_counts: self.registry.status_counts(),
            active_assignments: self.repos.assignments.all_active().await?.len(),
            sticky_sessions: self.balancer.sticky().len(),
            dropped_samples: self.analytics.dropped_samples(),
        })
    }

    /// Policy snapshot for a subscriber; unknown subscribers get the defaults
    pub fn subscriber_config(&self, subscriber_id: &str) -> Result<Arc<SubscriberConfig>> {
        if subscriber_id.trim().is_empty() {
            return Err(FleetError::Configuration("subscriber id is required".into()));
        }
        Ok(self
            .store
            .get(subscriber_id)
            .unwrap_or_else(|| Arc::new(SubscriberConfig::new(subscriber_id))))
    }

    pub async fn select_server(
        &self,
        subscriber_id: &str,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let config = self.subscriber_config(subscriber_id)?;
        self.balancer.select_server(&config, affinity_key).await
    }

    pub async fn provision(
        &self,
        subscriber_id: &str,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let config = self.subscriber_config(subscriber_id)?;
        self.balancer.provision(&config, affinity_key).await
    }

    pub async fn release(
        &self,
        subscriber_id: &str,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let ended = self.balancer.release(subscriber_id, affinity_key).await?;

        // Per-subscriber counters only matter while the subscriber holds a server
        if self.repos.assignments.active_for_subscriber(subscriber_id).await?.is_empty() {
            self.analytics.forget_subscriber(subscriber_id);
            self.rotation.forget_subscriber(subscriber_id);
            self.balancer.prune_idle_locks();
            debug!(subscriber = %subscriber_id, "Dropped idle subscriber state");
        }
        Ok(ended)
    }

    pub async fn rotate(
        &self,
        subscriber_id: &str,
        reason: RotationReason,
    ) -> Result<RotationOutcome> {
        self.rotation.rotate(subscriber_id, reason).await
    }

    /// Record a live request and rotate right away if it crossed a threshold
    #[instrument(skip(self, report), fields(server_id = report.server_id))]
    pub async fn report_request(
        &self,
        subscriber_id: &str,
        report: RequestReport,
    ) -> Result<Option<RotationOutcome>> {
        self.analytics.record_request(TrafficSample {
            server_id: report.server_id,
            subscriber_id: Some(subscriber_id.to_string()),
            timestamp: self.clock.now(),
            latency_ms: report.latency_ms,
            success: report.success,
            bytes: report.bytes,
        });

        let decision = self.rotation.evaluate(subscriber_id).await?;
        match decision.reason {
            Some(reason @ (RotationReason::ErrorRate | RotationReason::RequestLimit)) => {
                self.rotation.rotate(subscriber_id, reason).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, policy))]
    pub async fn enable_rotation(
        &self,
        subscriber_id: &str,
        policy: RotationPolicy,
    ) -> Result<Envelope> {
        let config = self.store.set_rotation(subscriber_id, policy).await?;
        info!(version = config.version, "Rotation enabled");
        Ok(Envelope::ok(
            "Rotation enabled",
            json!({
                "subscriber_id": subscriber_id,
                "version": config.version,
                "rotation": config.rotation,
            }),
        ))
    }

    #[instrument(skip(self, policy))]
    pub async fn configure_load_balancing(
        &self,
        subscriber_id: &str,
        policy: LoadBalancingPolicy,
    ) -> Result<Envelope> {
        let config = self.store.set_load_balancing(subscriber_id, policy).await?;
        info!(version = config.version, "Load balancing configured");
        Ok(Envelope::ok(
            "Load balancing configured",
            json!({
                "subscriber_id": subscriber_id,
                "version": config.version,
                "load_balancing": config.load_balancing,
            }),
        ))
    }

    /// Turn monitoring on and probe the subscriber's servers immediately
    #[instrument(skip(self))]
    pub async fn setup_health_monitoring(&self, subscriber_id: &str) -> Result<Envelope> {
        let config = self.store.set_health_monitoring(subscriber_id, true).await?;

        let server_ids: BTreeSet<ServerId> = self
            .repos
            .assignments
            .active_for_subscriber(subscriber_id)
            .await?
            .iter()
            .map(|a| a.server_id)
            .collect();

        let mut probed = Vec::new();
        for id in server_ids {
            let Some(server) = self.registry.get(id) else {
                continue;
            };
            if server.status() == ServerStatus::Offline {
                continue;
            }
            let result = self.monitor.probe(&server).await;
            probed.push(json!({
                "server_id": id,
                "status": server.status(),
                "latency_ms": result.latency_ms,
                "success": result.success,
                "error_class": result.error_class,
            }));
        }

        Ok(Envelope::ok(
            "Health monitoring enabled",
            json!({
                "subscriber_id": subscriber_id,
                "version": config.version,
                "servers": probed,
                "fleet_status": self.registry.status_counts(),
                "poll_interval_secs": self.config.health.poll_interval.as_secs(),
            }),
        ))
    }

    #[instrument(skip(self))]
    pub async fn get_performance_analytics(
        &self,
        subscriber_id: &str,
        range: TimeRange,
    ) -> Result<Envelope> {
        let snapshot = self.analytics_snapshot(subscriber_id, range).await?;
        Ok(Envelope::ok("Performance analytics", snapshot))
    }

    pub async fn analytics_snapshot(
        &self,
        subscriber_id: &str,
        range: TimeRange,
    ) -> Result<AnalyticsSnapshot> {
        let now = self.clock.now();
        let since = now - range.duration();
        let granularity = range.granularity();

        let server_ids: BTreeSet<ServerId> = self
            .repos
            .assignments
            .active_for_subscriber(subscriber_id)
            .await?
            .iter()
            .map(|a| a.server_id)
            .collect();

        let mut servers = Vec::new();
        for id in server_ids {
            let Some(server) = self.registry.get(id) else {
                continue;
            };
            servers.push(ServerAnalytics {
                server_id: id,
                status: server.status(),
                current_load: server.current_load(),
                score: self.analytics.score(id),
                windows: self.analytics.windows(id, granularity, since).await?,
                forecast: self.analytics.forecast(id, FORECAST_HORIZON_DAYS).await?,
            });
        }

        Ok(AnalyticsSnapshot {
            subscriber_id: subscriber_id.to_string(),
            range,
            generated_at: now,
            request_count: self.analytics.total_requests(subscriber_id),
            error_rate: self.analytics.error_rate(subscriber_id),
            servers,
            fleet_status: self.registry.status_counts(),
            dropped_samples: self.analytics.dropped_samples(),
        })
    }

    #[instrument(skip(self, params))]
    pub async fn manage_proxy(
        &self,
        subscriber_id: &str,
        action: &str,
        params: Value,
    ) -> Result<Envelope> {
        let action = ProxyAction::parse(action)?;
        let params: ManageParams = if params.is_null() {
            ManageParams::default()
        } else {
            serde_json::from_value(params)
                .map_err(|e| FleetError::Configuration(format!("invalid params: {}", e)))?
        };

        match action {
            ProxyAction::Assign => {
                let assignment = self.select_server(subscriber_id, params.affinity_key).await?;
                Ok(Envelope::ok("Server assigned", assignment))
            }
            ProxyAction::Provision => {
                let assignment = self.provision(subscriber_id, params.affinity_key).await?;
                Ok(Envelope::ok("Proxy provisioned", assignment))
            }
            ProxyAction::Rotate => {
                let outcome = self.rotate(subscriber_id, RotationReason::Manual).await?;
                let message = if outcome.is_rotated() {
                    "Rotation completed"
                } else {
                    "Rotation skipped"
                };
                Ok(Envelope::ok(message, outcome))
            }
            ProxyAction::Release => {
                let ended = self.release(subscriber_id, params.affinity_key).await?;
                Ok(Envelope::ok("Assignment released", ended))
            }
            ProxyAction::Status => {
                let status = self.subscriber_status(subscriber_id).await?;
                Ok(Envelope::ok("Subscriber status", status))
            }
            ProxyAction::QueryTraffic => {
                let traffic = self.query_traffic(subscriber_id).await?;
                Ok(Envelope::ok("Traffic usage", traffic))
            }
            ProxyAction::ResetTraffic => {
                let reset = self.reset_traffic(subscriber_id, params.server_id).await?;
                Ok(Envelope::ok("Traffic reset", json!({ "servers": reset })))
            }
            ProxyAction::SetOffline => {
                let server_id = require_server(params.server_id)?;
                let previous = self.monitor.set_offline(server_id).await?;
                Ok(Envelope::ok(
                    "Server set offline",
                    json!({ "server_id": server_id, "previous_status": previous }),
                ))
            }
            ProxyAction::BringOnline => {
                let server_id = require_server(params.server_id)?;
                let previous = self.monitor.bring_online(server_id).await?;
                Ok(Envelope::ok(
                    "Server brought online",
                    json!({ "server_id": server_id, "previous_status": previous }),
                ))
            }
        }
    }

    async fn subscriber_status(&self, subscriber_id: &str) -> Result<Value> {
        let config = self.subscriber_config(subscriber_id)?;
        let assignments = self
            .repos
            .assignments
            .active_for_subscriber(subscriber_id)
            .await?;
        let decision = self.rotation.evaluate(subscriber_id).await?;

        Ok(json!({
            "config": config.as_ref(),
            "assignments": assignments,
            "rotation_state": self.rotation.state(subscriber_id),
            "rotation_due": decision,
            "requests_since_rotation": self.analytics.requests_since_rotation(subscriber_id),
            "error_rate": self.analytics.error_rate(subscriber_id),
        }))
    }

    async fn query_traffic(&self, subscriber_id: &str) -> Result<Vec<ClientTraffic>> {
        let assignments = self
            .repos
            .assignments
            .active_for_subscriber(subscriber_id)
            .await?;

        let mut usage = Vec::new();
        for assignment in assignments {
            let Some(client) = assignment.client_handle.clone() else {
                continue;
            };
            let server = self.server(assignment.server_id)?;
            let traffic = self
                .gateway
                .query_traffic(&server, &ClientHandle(client.clone()))
                .await?;
            usage.push(ClientTraffic {
                server_id: assignment.server_id,
                affinity_key: assignment.affinity_key,
                client,
                up: traffic.up,
                down: traffic.down,
                total: traffic.total(),
            });
        }
        Ok(usage)
    }

    /// Reset counters on one server, or on every server the subscriber uses
    async fn reset_traffic(
        &self,
        subscriber_id: &str,
        server_id: Option<ServerId>,
    ) -> Result<Vec<ServerId>> {
        let targets: Vec<ServerId> = match server_id {
            Some(id) => vec![id],
            None => self
                .repos
                .assignments
                .active_for_subscriber(subscriber_id)
                .await?
                .iter()
                .map(|a| a.server_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        for id in &targets {
            let server = self.server(*id)?;
            self.gateway.reset_traffic(&server).await?;
        }
        Ok(targets)
    }

    fn server(&self, server_id: ServerId) -> Result<Arc<ProxyServer>> {
        self.registry
            .get(server_id)
            .ok_or_else(|| FleetError::NotFound(format!("server {}", server_id)))
    }

    /// Spawn the health, rotation, analytics, retention and event loops
    pub fn spawn_background(self: &Arc<Self>) -> BackgroundTasks {
        let (health, health_rx) = HealthMonitorHandle::new();
        let (rotation, rotation_rx) = RotationHandle::new();
        let (analytics, analytics_rx) = AnalyticsHandle::new();
        let (retention, retention_rx) = RetentionHandle::new();
        let (listener_tx, listener_rx) = watch::channel(false);

        let mut tasks = Vec::new();

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            engine.monitor.run(health_rx).await;
        }));

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            engine.rotation.run(rotation_rx).await;
        }));

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            engine.analytics.run(analytics_rx).await;
        }));

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            engine.retention.run(retention_rx).await;
        }));

        let engine = self.clone();
        let events = self.subscribe();
        tasks.push(tokio::spawn(async move {
            engine.listen(events, listener_rx).await;
        }));

        BackgroundTasks {
            health,
            rotation,
            analytics,
            retention,
            listener: listener_tx,
            tasks,
        }
    }

    /// Feed engine events back into the load balancer
    async fn listen(
        &self,
        mut events: broadcast::Receiver<FleetEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.balancer.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn require_server(server_id: Option<ServerId>) -> Result<ServerId> {
    server_id.ok_or_else(|| FleetError::Configuration("params.server_id is required".into()))
}

/// Running background loops
pub struct BackgroundTasks {
    health: HealthMonitorHandle,
    rotation: RotationHandle,
    analytics: AnalyticsHandle,
    retention: RetentionHandle,
    listener: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn shutdown(&self) {
        self.health.shutdown();
        self.rotation.shutdown();
        self.analytics.shutdown();
        self.retention.shutdown();
        let _ = self.listener.send(true);
    }

    /// Signal shutdown and wait for every loop to exit
    pub async fn join(self) {
        self.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
    }
}
