use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{HealthCheckResult, ServerId, ServerStatus};
use crate::error::{FleetError, Result};

/// Aggregation granularity for performance windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Minute, Granularity::Hour, Granularity::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minute" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            _ => None,
        }
    }

    pub fn width(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// How long closed windows of this granularity are kept
    pub fn retention(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::hours(24),
            Granularity::Hour => Duration::days(30),
            Granularity::Day => Duration::days(365),
        }
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.width().num_seconds();
        let secs = ts.timestamp();
        let start = secs - secs.rem_euclid(width);
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }
}

/// Live traffic observation reported by the calling layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub server_id: ServerId,
    pub subscriber_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    pub bytes: u64,
}

/// Anything fed into the analytics ingest buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Probe(HealthCheckResult),
    Traffic(TrafficSample),
}

impl Sample {
    pub fn server_id(&self) -> ServerId {
        match self {
            Sample::Probe(r) => r.server_id,
            Sample::Traffic(t) => t.server_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Sample::Probe(r) => r.timestamp,
            Sample::Traffic(t) => t.timestamp,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            Sample::Probe(r) => r.latency_ms,
            Sample::Traffic(t) => t.latency_ms,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            Sample::Probe(r) => r.success,
            Sample::Traffic(t) => t.success,
        }
    }

    pub fn bytes(&self) -> u64 {
        match self {
            Sample::Probe(_) => 0,
            Sample::Traffic(t) => t.bytes,
        }
    }
}

/// Closed aggregate over one time bucket; never mutated once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub server_id: ServerId,
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sample_count: u64,
    pub mean_latency_ms: f64,
    /// Fraction of failed samples, 0.0..=1.0
    pub error_rate: f64,
    pub bytes_transferred: u64,
}

/// Time range accepted by the analytics operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    LastHour,
    #[default]
    #[serde(rename = "24h")]
    Last24Hours,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
}

impl TimeRange {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(TimeRange::LastHour),
            "24h" => Ok(TimeRange::Last24Hours),
            "7d" => Ok(TimeRange::Last7Days),
            "30d" => Ok(TimeRange::Last30Days),
            other => Err(FleetError::Configuration(format!(
                "unknown time range '{}', expected 1h, 24h, 7d or 30d",
                other
            ))),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::LastHour => Duration::hours(1),
            TimeRange::Last24Hours => Duration::hours(24),
            TimeRange::Last7Days => Duration::days(7),
            TimeRange::Last30Days => Duration::days(30),
        }
    }

    /// Granularity used to report this range
    pub fn granularity(&self) -> Granularity {
        match self {
            TimeRange::LastHour => Granularity::Minute,
            TimeRange::Last24Hours | TimeRange::Last7Days => Granularity::Hour,
            TimeRange::Last30Days => Granularity::Day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// low < 7 samples, medium 7..=14, high > 14
    pub fn from_samples(samples: usize) -> Self {
        match samples {
            0..=6 => Confidence::Low,
            7..=14 => Confidence::Medium,
            _ => Confidence::High,
        }
    }
}

/// Latency trend projection for a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub server_id: ServerId,
    pub horizon_days: u32,
    pub samples: usize,
    /// Change in mean latency (ms) per day
    pub slope: f64,
    pub predicted_latency_ms: f64,
    pub trend: Trend,
    pub confidence: Confidence,
}

/// Per-server section of an analytics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAnalytics {
    pub server_id: ServerId,
    pub status: ServerStatus,
    pub current_load: u32,
    pub score: f64,
    pub windows: Vec<PerformanceWindow>,
    pub forecast: Option<Forecast>,
}

/// Result of the analytics operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub subscriber_id: String,
    pub range: TimeRange,
    pub generated_at: DateTime<Utc>,
    pub request_count: u64,
    /// Recent error rate in percent
    pub error_rate: f64,
    pub servers: Vec<ServerAnalytics>,
    pub fleet_status: HashMap<ServerStatus, usize>,
    pub dropped_samples: u64,
}
