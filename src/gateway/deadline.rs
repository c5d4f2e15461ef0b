use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use super::{ClientHandle, ClientSpec, GatewayError, GatewayResult, PanelGateway, TrafficUsage};
use crate::models::ProxyServer;

/// Bounds every panel call with a hard deadline
///
/// An expired deadline is reported as `GatewayError::Timeout`, an ordinary
/// failure outcome for the caller.
pub struct DeadlineGateway {
    inner: Arc<dyn PanelGateway>,
    deadline: Duration,
}

impl DeadlineGateway {
    pub fn new(inner: Arc<dyn PanelGateway>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn bounded<T, F>(&self, op: &'static str, server: &ProxyServer, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        match timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    server_id = server.id,
                    op,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Panel call timed out"
                );
                Err(GatewayError::Timeout)
            }
        }
    }
}

#[async_trait]
impl PanelGateway for DeadlineGateway {
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool> {
        self.bounded("test_connection", server, self.inner.test_connection(server))
            .await
    }

    async fn create_client(
        &self,
        server: &ProxyServer,
        spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle> {
        self.bounded("create_client", server, self.inner.create_client(server, spec))
            .await
    }

    async fn delete_client(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<()> {
        self.bounded("delete_client", server, self.inner.delete_client(server, handle))
            .await
    }

    async fn query_traffic(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage> {
        self.bounded("query_traffic", server, self.inner.query_traffic(server, handle))
            .await
    }

    async fn reset_traffic(&self, server: &ProxyServer) -> GatewayResult<()> {
        self.bounded("reset_traffic", server, self.inner.reset_traffic(server))
            .await
    }
}
