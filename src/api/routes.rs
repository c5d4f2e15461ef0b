//! API route definitions

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Subscriber operations
        .route(
            "/subscribers/:id/rotation",
            post(handlers::operations::enable_rotation),
        )
        .route(
            "/subscribers/:id/load-balancing",
            post(handlers::operations::configure_load_balancing),
        )
        .route(
            "/subscribers/:id/health-monitoring",
            post(handlers::operations::setup_health_monitoring),
        )
        .route(
            "/subscribers/:id/analytics",
            get(handlers::operations::get_performance_analytics),
        )
        .route(
            "/subscribers/:id/proxy",
            post(handlers::operations::manage_proxy),
        )
        .route(
            "/subscribers/:id/requests",
            post(handlers::operations::report_request),
        )
        // Fleet registration
        .route(
            "/servers",
            get(handlers::servers::list_servers).post(handlers::servers::register_server),
        )
        .route("/servers/:id", delete(handlers::servers::decommission_server))
        // Event stream
        .route("/ws/events", get(websocket::events::events_ws))
}
