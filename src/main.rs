//! Proxyfleet - Entry Point
//!
//! Builds the engine, starts its background loops and the API server, and
//! shuts everything down on Ctrl+C or SIGTERM.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxyfleet::api::ApiServer;
use proxyfleet::config::LogConfig;
use proxyfleet::gateway::{PanelGateway, TcpProbeGateway, VendorGateways};
use proxyfleet::repository::{PgStore, Repositories};
use proxyfleet::{Config, Database, EngineDeps, FleetEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting proxyfleet");

    let database = match &config.database {
        Some(db_config) => {
            let db = Database::connect(db_config).await?;
            db.run_migrations().await?;
            info!("Database migrations complete");
            Some(db)
        }
        None => {
            warn!("STORAGE_BACKEND is memory, state will not survive a restart");
            None
        }
    };

    let repositories = match &database {
        Some(db) => Repositories::from_store(Arc::new(PgStore::new(db.pool().clone()))),
        None => Repositories::in_memory(),
    };

    let gateway: Arc<dyn PanelGateway> = Arc::new(
        VendorGateways::new().with_fallback(Arc::new(TcpProbeGateway::new(
            config.engine.health.probe_timeout,
        ))),
    );

    let engine = Arc::new(
        FleetEngine::build(config.engine.clone(), EngineDeps::new(repositories, gateway)).await?,
    );
    let background = engine.spawn_background();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_server = ApiServer::new(config.api.clone(), engine.clone());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(shutdown_rx).await {
            error!("API server error: {}", e);
        }
    });

    info!("API listening on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    background.join().await;
    let _ = api_task.await;

    if let Some(db) = database {
        db.close().await;
    }

    info!("Proxyfleet stopped");
    Ok(())
}

/// JSON or human-readable output, filtered by RUST_LOG or LOG_LEVEL
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyfleet={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
