//! Per-subscriber policy objects held by the configuration store.

use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Upper bound for `AdvancedOptions::max_connections`
pub const MAX_CONNECTIONS_LIMIT: u32 = 10_000;

/// Upper bound for interval, cooldown and sticky durations (one year)
pub const MAX_POLICY_SECS: u64 = 365 * 24 * 60 * 60;

/// What makes a subscriber rotate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    TimeBased,
    RequestBased,
    Hybrid,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::TimeBased => "time_based",
            TriggerType::RequestBased => "request_based",
            TriggerType::Hybrid => "hybrid",
        }
    }

    pub fn uses_interval(&self) -> bool {
        matches!(self, TriggerType::TimeBased | TriggerType::Hybrid)
    }

    pub fn uses_requests(&self) -> bool {
        matches!(self, TriggerType::RequestBased | TriggerType::Hybrid)
    }
}

impl FromStr for TriggerType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "time_based" | "time-based" | "timebased" => Ok(TriggerType::TimeBased),
            "request_based" | "request-based" | "requestbased" => Ok(TriggerType::RequestBased),
            "hybrid" => Ok(TriggerType::Hybrid),
            other => Err(FleetError::Configuration(format!(
                "unknown rotation trigger '{}'",
                other
            ))),
        }
    }
}

/// Rotation policy for one subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationPolicy {
    #[serde(default)]
    pub subscriber_id: String,
    pub trigger: TriggerType,
    /// Seconds between time-based rotations
    pub interval_secs: u64,
    /// Requests before a request-based rotation
    pub max_requests: u64,
    /// Minimum seconds between two rotations
    pub cooldown_secs: u64,
    /// Error rate in percent that forces a rotation
    pub error_threshold: f64,
    /// Seconds an affinity-keyed assignment stays pinned
    pub sticky_duration_secs: u64,
    /// Bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            subscriber_id: String::new(),
            trigger: TriggerType::TimeBased,
            interval_secs: 300,
            max_requests: 1000,
            cooldown_secs: 60,
            error_threshold: 5.0,
            sticky_duration_secs: 600,
            version: 0,
        }
    }
}

impl RotationPolicy {
    pub fn interval(&self) -> Duration {
        bounded_seconds(self.interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        bounded_seconds(self.cooldown_secs)
    }

    pub fn sticky_duration(&self) -> Duration {
        bounded_seconds(self.sticky_duration_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscriber_id.trim().is_empty() {
            return Err(FleetError::Configuration("subscriber id is required".into()));
        }
        check_duration("interval", self.interval_secs)?;
        if self.max_requests == 0 {
            return Err(FleetError::Configuration(
                "max_requests must be positive".into(),
            ));
        }
        check_duration("cooldown", self.cooldown_secs)?;
        if !(self.error_threshold > 0.0 && self.error_threshold <= 100.0) {
            return Err(FleetError::Configuration(
                "error_threshold must be within (0, 100]".into(),
            ));
        }
        check_duration("sticky_duration", self.sticky_duration_secs)?;
        Ok(())
    }
}

fn check_duration(name: &str, secs: u64) -> Result<()> {
    if secs == 0 || secs > MAX_POLICY_SECS {
        return Err(FleetError::Configuration(format!(
            "{} must be within 1..={} seconds",
            name, MAX_POLICY_SECS
        )));
    }
    Ok(())
}

/// Seconds clamped to `MAX_POLICY_SECS`, for policies persisted before validation
fn bounded_seconds(secs: u64) -> Duration {
    Duration::try_seconds(secs.min(MAX_POLICY_SECS) as i64).unwrap_or(Duration::MAX)
}

/// Server selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    IpHash,
    Geographic,
    PerformanceBased,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::RoundRobin,
        Algorithm::WeightedRoundRobin,
        Algorithm::LeastConnections,
        Algorithm::IpHash,
        Algorithm::Geographic,
        Algorithm::PerformanceBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::IpHash => "ip_hash",
            Algorithm::Geographic => "geographic",
            Algorithm::PerformanceBased => "performance_based",
        }
    }
}

impl FromStr for Algorithm {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(Algorithm::RoundRobin),
            "weighted_round_robin" | "weighted-round-robin" => Ok(Algorithm::WeightedRoundRobin),
            "least_connections" | "least-connections" | "least_conn" => {
                Ok(Algorithm::LeastConnections)
            }
            "ip_hash" | "ip-hash" => Ok(Algorithm::IpHash),
            "geographic" | "geo" => Ok(Algorithm::Geographic),
            "performance_based" | "performance-based" => Ok(Algorithm::PerformanceBased),
            other => Err(FleetError::Configuration(format!(
                "unknown load balancing algorithm '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Load balancing policy for one subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingPolicy {
    #[serde(default)]
    pub subscriber_id: String,
    pub algorithm: Algorithm,
    /// Mean latency in milliseconds above which a server is avoided
    pub response_threshold_ms: u64,
    /// Error rate in percent above which a server is avoided
    pub error_threshold: f64,
    pub failover: bool,
    pub health_check: bool,
    /// Region tag used by the geographic algorithm
    #[serde(default)]
    pub preferred_region: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl Default for LoadBalancingPolicy {
    fn default() -> Self {
        Self {
            subscriber_id: String::new(),
            algorithm: Algorithm::RoundRobin,
            response_threshold_ms: 2000,
            error_threshold: 5.0,
            failover: true,
            health_check: true,
            preferred_region: None,
            version: 0,
        }
    }
}

impl LoadBalancingPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_id.trim().is_empty() {
            return Err(FleetError::Configuration("subscriber id is required".into()));
        }
        if self.response_threshold_ms == 0 {
            return Err(FleetError::Configuration(
                "response_threshold must be positive".into(),
            ));
        }
        if !(self.error_threshold > 0.0 && self.error_threshold <= 100.0) {
            return Err(FleetError::Configuration(
                "error_threshold must be within (0, 100]".into(),
            ));
        }
        if self.algorithm == Algorithm::Geographic
            && self
                .preferred_region
                .as_deref()
                .map(|r| r.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(FleetError::Configuration(
                "geographic balancing requires preferred_region".into(),
            ));
        }
        Ok(())
    }
}

/// Advanced per-subscriber connection options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    pub connection_pooling: bool,
    pub max_connections: u32,
    /// Bandwidth cap in Mbps; `None` means unlimited
    pub bandwidth_limit: Option<u64>,
    pub compression: bool,
    pub traffic_shaping: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            connection_pooling: true,
            max_connections: 100,
            bandwidth_limit: None,
            compression: false,
            traffic_shaping: false,
        }
    }
}

impl AdvancedOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&self.max_connections) {
            return Err(FleetError::Configuration(format!(
                "max_connections must be within 1..={}",
                MAX_CONNECTIONS_LIMIT
            )));
        }
        if self.bandwidth_limit == Some(0) {
            return Err(FleetError::Configuration(
                "bandwidth_limit must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// Everything the store keeps for one subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub subscriber_id: String,
    pub rotation: Option<RotationPolicy>,
    pub load_balancing: Option<LoadBalancingPolicy>,
    pub options: AdvancedOptions,
    pub health_monitoring: bool,
    pub version: u64,
}

impl SubscriberConfig {
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            rotation: None,
            load_balancing: None,
            options: AdvancedOptions::default(),
            health_monitoring: false,
            version: 0,
        }
    }

    /// Load balancing policy, falling back to the documented defaults
    pub fn load_balancing_or_default(&self) -> LoadBalancingPolicy {
        self.load_balancing.clone().unwrap_or_else(|| LoadBalancingPolicy {
            subscriber_id: self.subscriber_id.clone(),
            ..LoadBalancingPolicy::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> RotationPolicy {
        RotationPolicy {
            subscriber_id: "sub-1".to_string(),
            ..RotationPolicy::default()
        }
    }

    #[test]
    fn test_trigger_and_algorithm_parsing() {
        assert_eq!("hybrid".parse::<TriggerType>().unwrap(), TriggerType::Hybrid);
        assert_eq!(
            "Time-Based".parse::<TriggerType>().unwrap(),
            TriggerType::TimeBased
        );
        assert!("sometimes".parse::<TriggerType>().is_err());

        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<Algorithm>().unwrap(), algorithm);
        }
        assert!(matches!(
            "random".parse::<Algorithm>(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn test_rotation_policy_validation() {
        assert!(rotation().validate().is_ok());

        let mut p = rotation();
        p.interval_secs = 0;
        assert!(p.validate().is_err());

        let mut p = rotation();
        p.cooldown_secs = 0;
        assert!(p.validate().is_err());

        let mut p = rotation();
        p.error_threshold = 0.0;
        assert!(p.validate().is_err());

        let mut p = rotation();
        p.error_threshold = f64::NAN;
        assert!(p.validate().is_err());

        let mut p = rotation();
        p.subscriber_id = " ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rotation_durations_are_bounded() {
        let mut p = rotation();
        p.interval_secs = MAX_POLICY_SECS;
        p.cooldown_secs = MAX_POLICY_SECS;
        p.sticky_duration_secs = MAX_POLICY_SECS;
        assert!(p.validate().is_ok());

        for secs in [MAX_POLICY_SECS + 1, 9_000_000_000_000, 10_000_000_000_000_000, u64::MAX] {
            let mut p = rotation();
            p.interval_secs = secs;
            assert!(matches!(p.validate(), Err(FleetError::Configuration(_))));

            let mut p = rotation();
            p.cooldown_secs = secs;
            assert!(matches!(p.validate(), Err(FleetError::Configuration(_))));

            let mut p = rotation();
            p.sticky_duration_secs = secs;
            assert!(matches!(p.validate(), Err(FleetError::Configuration(_))));
        }

        // Unvalidated values never overflow the accessors
        let p = RotationPolicy {
            interval_secs: u64::MAX,
            sticky_duration_secs: u64::MAX,
            ..rotation()
        };
        assert_eq!(p.interval(), Duration::seconds(MAX_POLICY_SECS as i64));
        assert_eq!(p.sticky_duration(), Duration::seconds(MAX_POLICY_SECS as i64));
    }

    #[test]
    fn test_load_balancing_policy_validation() {
        let mut p = LoadBalancingPolicy {
            subscriber_id: "sub-1".to_string(),
            ..LoadBalancingPolicy::default()
        };
        assert!(p.validate().is_ok());

        p.algorithm = Algorithm::Geographic;
        assert!(p.validate().is_err());

        p.preferred_region = Some("eu-west".to_string());
        assert!(p.validate().is_ok());

        p.response_threshold_ms = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_advanced_options_bounds() {
        assert!(AdvancedOptions::default().validate().is_ok());

        let mut o = AdvancedOptions::default();
        o.max_connections = 0;
        assert!(o.validate().is_err());

        o.max_connections = MAX_CONNECTIONS_LIMIT + 1;
        assert!(o.validate().is_err());

        o.max_connections = 10;
        o.bandwidth_limit = Some(0);
        assert!(o.validate().is_err());

        o.bandwidth_limit = Some(50);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn test_policy_deserializes_snake_case_enums() {
        let p: LoadBalancingPolicy = serde_json::from_str(
            r#"{"algorithm":"least_connections","response_threshold_ms":1500,
                "error_threshold":5,"failover":true,"health_check":false}"#,
        )
        .unwrap();
        assert_eq!(p.algorithm, Algorithm::LeastConnections);
        assert!(p.preferred_region.is_none());

        let bad = serde_json::from_str::<LoadBalancingPolicy>(
            r#"{"algorithm":"chaos","response_threshold_ms":1,"error_threshold":5,
                "failover":true,"health_check":true}"#,
        );
        assert!(bad.is_err());
    }
}
