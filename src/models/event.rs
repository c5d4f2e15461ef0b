use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ServerId, ServerStatus};

/// Why an assignment changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Initial,
    Interval,
    RequestLimit,
    ErrorRate,
    Expired,
    Manual,
    Failover,
    Released,
}

/// Engine events pushed to subscribers (load balancer, alerting, websocket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    ServerStatusChanged {
        server_id: ServerId,
        from: ServerStatus,
        to: ServerStatus,
        at: DateTime<Utc>,
    },
    RemediationAttempted {
        server_id: ServerId,
        attempt: u32,
        at: DateTime<Utc>,
    },
    RemediationExhausted {
        server_id: ServerId,
        attempts: u32,
        at: DateTime<Utc>,
    },
    AssignmentChanged {
        subscriber_id: String,
        affinity_key: Option<String>,
        from: Option<ServerId>,
        to: Option<ServerId>,
        reason: ChangeReason,
        at: DateTime<Utc>,
    },
    RotationSkipped {
        subscriber_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}
