use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ClientHandle, ClientSpec, GatewayError, GatewayResult, PanelGateway, TrafficUsage};
use crate::models::ProxyServer;

/// Dispatches each call to the gateway registered for the server's vendor
#[derive(Default)]
pub struct VendorGateways {
    vendors: HashMap<String, Arc<dyn PanelGateway>>,
    fallback: Option<Arc<dyn PanelGateway>>,
}

impl VendorGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>, gateway: Arc<dyn PanelGateway>) -> Self {
        self.vendors.insert(vendor.into().to_lowercase(), gateway);
        self
    }

    /// Gateway used for vendors without a dedicated client
    pub fn with_fallback(mut self, gateway: Arc<dyn PanelGateway>) -> Self {
        self.fallback = Some(gateway);
        self
    }

    fn route(&self, server: &ProxyServer) -> GatewayResult<&Arc<dyn PanelGateway>> {
        self.vendors
            .get(&server.panel.vendor.to_lowercase())
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                GatewayError::Connectivity(format!(
                    "no gateway registered for vendor '{}'",
                    server.panel.vendor
                ))
            })
    }
}

#[async_trait]
impl PanelGateway for VendorGateways {
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool> {
        self.route(server)?.test_connection(server).await
    }

    async fn create_client(
        &self,
        server: &ProxyServer,
        spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle> {
        self.route(server)?.create_client(server, spec).await
    }

    async fn delete_client(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<()> {
        self.route(server)?.delete_client(server, handle).await
    }

    async fn query_traffic(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage> {
        self.route(server)?.query_traffic(server, handle).await
    }

    async fn reset_traffic(&self, server: &ProxyServer) -> GatewayResult<()> {
        self.route(server)?.reset_traffic(server).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::TcpProbeGateway;
    use crate::models::server::test_spec;

    #[tokio::test]
    async fn test_unknown_vendor_without_fallback_fails() {
        let gateways = VendorGateways::new();
        let server = ProxyServer::new(test_spec(1));

        assert!(matches!(
            gateways.test_connection(&server).await,
            Err(GatewayError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn test_vendor_lookup_is_case_insensitive() {
        let gateways = VendorGateways::new().with_vendor("TEST", Arc::new(TcpProbeGateway::default()));
        let server = ProxyServer::new(test_spec(1));

        // Routed to the tcp gateway, which does not manage clients
        assert_eq!(
            gateways.reset_traffic(&server).await,
            Err(GatewayError::Unsupported("reset_traffic"))
        );
    }
}
