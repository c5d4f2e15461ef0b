//! API server using Axum
//!
//! Exposes the fleet operation API and the event stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::engine::FleetEngine;
use crate::error::{FleetError, Result};

use super::middleware::{cors_layer, log_request};
use super::routes;

/// Upper bound on one API request, panel calls included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FleetEngine>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<FleetEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, engine: Arc<FleetEngine>) -> Self {
        Self {
            config,
            state: AppState::new(engine),
        }
    }

    /// Build the router with tracing, CORS, a request timeout and logging applied
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&self.config.cors_origins))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(axum::middleware::from_fn(log_request)),
        )
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| FleetError::Configuration(format!("invalid API address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| FleetError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
