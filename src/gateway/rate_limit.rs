//! Outbound rate limiting for panel calls
//!
//! Uses the governor crate so each panel gets its own lock-free token bucket.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use tracing::debug;

use super::{ClientHandle, ClientSpec, GatewayResult, PanelGateway, TrafficUsage};
use crate::models::{ProxyServer, ServerId};

type DirectLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Caps calls per second against each server's panel
///
/// Calls wait for a permit instead of failing, so wrap this in a
/// `DeadlineGateway` to keep the total wait bounded.
pub struct RateLimitedGateway {
    inner: Arc<dyn PanelGateway>,
    limiters: DashMap<ServerId, Arc<DirectLimiter>>,
    per_second: NonZeroU32,
}

impl RateLimitedGateway {
    pub fn new(inner: Arc<dyn PanelGateway>, per_second: u32) -> Self {
        Self {
            inner,
            limiters: DashMap::new(),
            per_second: NonZeroU32::new(per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        }
    }

    fn limiter(&self, server_id: ServerId) -> Arc<DirectLimiter> {
        self.limiters
            .entry(server_id)
            .or_insert_with(|| Arc::new(GovRateLimiter::direct(Quota::per_second(self.per_second))))
            .clone()
    }

    async fn permit(&self, server: &ProxyServer) {
        let limiter = self.limiter(server.id);
        if limiter.check().is_err() {
            debug!(server_id = server.id, "Panel rate limit reached, waiting for permit");
            limiter.until_ready().await;
        }
    }

    /// Drop limiter state for servers no longer in the fleet
    pub fn forget(&self, server_id: ServerId) {
        self.limiters.remove(&server_id);
    }

    /// Number of panels with limiter state
    pub fn tracked_servers(&self) -> usize {
        self.limiters.len()
    }
}

#[async_trait]
impl PanelGateway for RateLimitedGateway {
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool> {
        self.permit(server).await;
        self.inner.test_connection(server).await
    }

    async fn create_client(
        &self,
        server: &ProxyServer,
        spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle> {
        self.permit(server).await;
        self.inner.create_client(server, spec).await
    }

    async fn delete_client(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<()> {
        self.permit(server).await;
        self.inner.delete_client(server, handle).await
    }

    async fn query_traffic(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage> {
        self.permit(server).await;
        self.inner.query_traffic(server, handle).await
    }

    async fn reset_traffic(&self, server: &ProxyServer) -> GatewayResult<()> {
        self.permit(server).await;
        self.inner.reset_traffic(server).await
    }
}
