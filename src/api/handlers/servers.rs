//! Fleet registration handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::FleetError;
use crate::models::{Envelope, ServerId, ServerSpec};

/// List every registered server
pub async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(Envelope::ok("Servers", state.engine.servers()))
}

pub async fn register_server(
    State(state): State<AppState>,
    Json(spec): Json<ServerSpec>,
) -> Result<impl IntoResponse, FleetError> {
    let record = state.engine.register_server(spec).await?;
    info!("Server {} registered via API", record.spec.id);
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Server registered", record)),
    ))
}

pub async fn decommission_server(
    State(state): State<AppState>,
    Path(id): Path<ServerId>,
) -> Result<impl IntoResponse, FleetError> {
    let record = state.engine.decommission_server(id).await?;
    Ok(Json(Envelope::ok("Server decommissioned", record)))
}
