//! Subscriber operation handlers
//!
//! Each handler answers with the operation envelope. Failures keep their
//! HTTP status and carry an envelope with `success: false`.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::server::AppState;
use crate::engine::RequestReport;
use crate::error::FleetError;
use crate::models::{Envelope, LoadBalancingPolicy, RotationPolicy, TimeRange};

#[derive(Debug, Deserialize, Default)]
pub struct AnalyticsQuery {
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManageProxyRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

pub async fn enable_rotation(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(policy): Json<RotationPolicy>,
) -> Result<impl IntoResponse, FleetError> {
    let envelope = state.engine.enable_rotation(&subscriber_id, policy).await?;
    Ok(Json(envelope))
}

pub async fn configure_load_balancing(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(policy): Json<LoadBalancingPolicy>,
) -> Result<impl IntoResponse, FleetError> {
    let envelope = state
        .engine
        .configure_load_balancing(&subscriber_id, policy)
        .await?;
    Ok(Json(envelope))
}

pub async fn setup_health_monitoring(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> Result<impl IntoResponse, FleetError> {
    let envelope = state.engine.setup_health_monitoring(&subscriber_id).await?;
    Ok(Json(envelope))
}

pub async fn get_performance_analytics(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, FleetError> {
    let range = match query.range.as_deref() {
        Some(raw) => TimeRange::parse(raw)?,
        None => TimeRange::default(),
    };
    let envelope = state
        .engine
        .get_performance_analytics(&subscriber_id, range)
        .await?;
    Ok(Json(envelope))
}

pub async fn manage_proxy(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(req): Json<ManageProxyRequest>,
) -> Result<impl IntoResponse, FleetError> {
    let envelope = state
        .engine
        .manage_proxy(&subscriber_id, &req.action, req.params)
        .await?;
    Ok(Json(envelope))
}

/// Record one live request outcome; may trigger an immediate rotation
pub async fn report_request(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(report): Json<RequestReport>,
) -> Result<impl IntoResponse, FleetError> {
    let rotation = state.engine.report_request(&subscriber_id, report).await?;
    Ok(Json(Envelope::ok(
        "Request recorded",
        json!({ "rotation": rotation }),
    )))
}
