//! Connectivity-only gateway
//!
//! Checks that a panel endpoint accepts TCP connections. Client management
//! needs a vendor-specific gateway and is reported as unsupported.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ClientHandle, ClientSpec, GatewayError, GatewayResult, PanelGateway, TrafficUsage};
use crate::models::ProxyServer;

pub struct TcpProbeGateway {
    connect_timeout: Duration,
}

impl TcpProbeGateway {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn address(server: &ProxyServer) -> GatewayResult<String> {
        let url = &server.panel.url;
        let host = url
            .host_str()
            .ok_or_else(|| GatewayError::Connectivity(format!("panel url {} has no host", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| GatewayError::Connectivity(format!("panel url {} has no port", url)))?;
        Ok(format!("{}:{}", host, port))
    }
}

impl Default for TcpProbeGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PanelGateway for TcpProbeGateway {
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool> {
        let addr = Self::address(server)?;

        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => {
                debug!(server_id = server.id, %addr, "Panel accepted connection");
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(server_id = server.id, %addr, "Panel connection failed: {}", e);
                Err(GatewayError::Connectivity(e.to_string()))
            }
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    async fn create_client(
        &self,
        _server: &ProxyServer,
        _spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle> {
        Err(GatewayError::Unsupported("create_client"))
    }

    async fn delete_client(
        &self,
        _server: &ProxyServer,
        _handle: &ClientHandle,
    ) -> GatewayResult<()> {
        Err(GatewayError::Unsupported("delete_client"))
    }

    async fn query_traffic(
        &self,
        _server: &ProxyServer,
        _handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage> {
        Err(GatewayError::Unsupported("query_traffic"))
    }

    async fn reset_traffic(&self, _server: &ProxyServer) -> GatewayResult<()> {
        Err(GatewayError::Unsupported("reset_traffic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PanelEndpoint, ServerSpec};
    use tokio::net::TcpListener;
    use url::Url;

    fn server_at(url: &str) -> ProxyServer {
        ProxyServer::new(ServerSpec {
            id: 1,
            panel: PanelEndpoint {
                vendor: "tcp".to_string(),
                url: Url::parse(url).unwrap(),
            },
            region: None,
            capacity: 10,
        })
    }

    #[tokio::test]
    async fn test_connects_to_listening_panel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = server_at(&format!("http://127.0.0.1:{}", port));

        let gateway = TcpProbeGateway::default();
        assert_eq!(gateway.test_connection(&server).await, Ok(true));
    }

    #[tokio::test]
    async fn test_closed_port_is_connectivity_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let server = server_at(&format!("http://127.0.0.1:{}", port));

        let gateway = TcpProbeGateway::new(Duration::from_secs(2));
        let result = gateway.test_connection(&server).await;
        assert!(matches!(
            result,
            Err(GatewayError::Connectivity(_)) | Err(GatewayError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_client_operations_unsupported() {
        let gateway = TcpProbeGateway::default();
        let server = server_at("https://panel.example");
        assert_eq!(
            gateway.reset_traffic(&server).await,
            Err(GatewayError::Unsupported("reset_traffic"))
        );
    }
}
