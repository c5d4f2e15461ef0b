//! Vendor control-panel gateway
//!
//! The engine talks to every panel through the narrow `PanelGateway` trait.
//! Vendor clients live outside this crate; the wrappers here add deadlines,
//! outbound rate limiting and per-vendor dispatch.

mod deadline;
mod rate_limit;
mod tcp;
mod vendor;

pub use deadline::DeadlineGateway;
pub use rate_limit::RateLimitedGateway;
pub use tcp::TcpProbeGateway;
pub use vendor::VendorGateways;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AdvancedOptions, ErrorClass, ProxyServer};

/// Typed failures returned by panel calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("panel unreachable: {0}")]
    Connectivity(String),

    #[error("panel rejected credentials: {0}")]
    Auth(String),

    #[error("panel rate limited the request")]
    RateLimited,

    #[error("panel call exceeded its deadline")]
    Timeout,

    #[error("operation not supported by this panel: {0}")]
    Unsupported(&'static str),
}

impl GatewayError {
    /// Classification recorded on health check results
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Connectivity(_) | GatewayError::Unsupported(_) => {
                ErrorClass::Connectivity
            }
            GatewayError::Auth(_) => ErrorClass::Auth,
            GatewayError::RateLimited => ErrorClass::RateLimited,
            GatewayError::Timeout => ErrorClass::Timeout,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Opaque identifier of a client created on a panel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientHandle(pub String);

impl std::fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to create on the panel for a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub subscriber_id: String,
    pub affinity_key: Option<String>,
    pub options: AdvancedOptions,
}

/// Traffic counters reported by a panel, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficUsage {
    pub up: u64,
    pub down: u64,
}

impl TrafficUsage {
    pub fn total(&self) -> u64 {
        self.up.saturating_add(self.down)
    }
}

/// Per-vendor control panel client
#[async_trait]
pub trait PanelGateway: Send + Sync {
    /// Probe the panel; `Ok(false)` means reachable but reporting the server unusable
    async fn test_connection(&self, server: &ProxyServer) -> GatewayResult<bool>;

    async fn create_client(
        &self,
        server: &ProxyServer,
        spec: &ClientSpec,
    ) -> GatewayResult<ClientHandle>;

    async fn delete_client(&self, server: &ProxyServer, handle: &ClientHandle)
        -> GatewayResult<()>;

    async fn query_traffic(
        &self,
        server: &ProxyServer,
        handle: &ClientHandle,
    ) -> GatewayResult<TrafficUsage>;

    async fn reset_traffic(&self, server: &ProxyServer) -> GatewayResult<()>;
}
