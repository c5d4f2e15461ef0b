use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::models::Envelope;

/// Unified error type for the fleet engine
#[derive(Error, Debug)]
pub enum FleetError {
    // Panel / network errors
    #[error("Panel unreachable: {0}")]
    Connectivity(String),

    #[error("Panel authentication failed: {0}")]
    Authentication(String),

    // Selection errors
    #[error("No eligible server: {0}")]
    Capacity(String),

    // Policy errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Overlapping rotation for subscriber {subscriber}")]
    ConcurrencyConflict { subscriber: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            FleetError::Configuration(_) => StatusCode::BAD_REQUEST,

            FleetError::NotFound(_) => StatusCode::NOT_FOUND,

            FleetError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,

            FleetError::Connectivity(_) | FleetError::Authentication(_) => {
                StatusCode::BAD_GATEWAY
            }

            FleetError::Capacity(_) | FleetError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            FleetError::Database(_) | FleetError::Io(_) | FleetError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<GatewayError> for FleetError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => FleetError::Authentication(msg),
            GatewayError::Unsupported(op) => {
                FleetError::Configuration(format!("panel does not support {}", op))
            }
            other => FleetError::Connectivity(other.to_string()),
        }
    }
}

impl From<url::ParseError> for FleetError {
    fn from(err: url::ParseError) -> Self {
        FleetError::Configuration(format!("invalid panel url: {}", err))
    }
}

// API error responses use the same envelope as successful operations
impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(Envelope::from_error(&self))).into_response()
    }
}
