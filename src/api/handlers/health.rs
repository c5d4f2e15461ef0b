//! Liveness and fleet summary endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::FleetError;
use crate::models::Envelope;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxyfleet"
        })),
    )
}

/// Fleet summary with uptime
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, FleetError> {
    let fleet = state.engine.fleet_status().await?;
    Ok(Json(Envelope::ok(
        "Fleet status",
        json!({
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "fleet": fleet,
        }),
    )))
}
