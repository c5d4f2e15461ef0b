use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServerId;

/// Failure classification for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    #[default]
    None,
    Timeout,
    Connectivity,
    Auth,
    RateLimited,
    /// Panel answered but reported the server unusable
    Rejected,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::None => "none",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::Auth => "auth",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ErrorClass::None),
            "timeout" => Some(ErrorClass::Timeout),
            "connectivity" => Some(ErrorClass::Connectivity),
            "auth" => Some(ErrorClass::Auth),
            "rate_limited" => Some(ErrorClass::RateLimited),
            "rejected" => Some(ErrorClass::Rejected),
            _ => None,
        }
    }
}

/// Outcome of a single health probe (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub server_id: ServerId,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    pub error_class: ErrorClass,
}
