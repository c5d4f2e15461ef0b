//! Server health tracking
//!
//! `next_health` is the whole state machine; the monitor only feeds it probe
//! outcomes and reacts to the transitions it reports.

mod monitor;
mod remediation;

pub use monitor::{CycleReport, HealthMonitor, HealthMonitorHandle};
pub use remediation::{
    AlertSink, RemediationHook, RemediationOutcome, Remediator, TracingAlertSink,
};

use chrono::{DateTime, Utc};

use crate::config::HealthConfig;
use crate::models::{HealthState, ServerStatus};

/// Consecutive-count thresholds driving status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub degraded_after: u32,
    pub unhealthy_after: u32,
    pub recovery_successes: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 1,
            unhealthy_after: 3,
            recovery_successes: 2,
        }
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            degraded_after: config.degraded_after,
            unhealthy_after: config.unhealthy_after,
            recovery_successes: config.recovery_successes,
        }
    }
}

/// Apply one probe outcome to a server's health state
///
/// Offline is administrative and never changes here.
pub fn next_health(
    state: &HealthState,
    success: bool,
    at: DateTime<Utc>,
    thresholds: &HealthThresholds,
) -> HealthState {
    if state.status == ServerStatus::Offline {
        return state.clone();
    }

    let mut next = state.clone();
    next.last_probe_at = Some(at);

    if success {
        next.consecutive_failures = 0;
        next.consecutive_successes = state.consecutive_successes.saturating_add(1);
        next.status = match state.status {
            ServerStatus::Unhealthy if next.consecutive_successes < thresholds.recovery_successes => {
                ServerStatus::Unhealthy
            }
            _ => ServerStatus::Healthy,
        };
        if next.status == ServerStatus::Healthy {
            next.last_healthy_at = Some(at);
        }
    } else {
        next.consecutive_successes = 0;
        next.consecutive_failures = state.consecutive_failures.saturating_add(1);
        next.status = match state.status {
            ServerStatus::Unknown | ServerStatus::Unhealthy => ServerStatus::Unhealthy,
            current => {
                if next.consecutive_failures >= thresholds.unhealthy_after {
                    ServerStatus::Unhealthy
                } else if next.consecutive_failures >= thresholds.degraded_after {
                    ServerStatus::Degraded
                } else {
                    current
                }
            }
        };
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(outcomes: &[bool]) -> Vec<ServerStatus> {
        let thresholds = HealthThresholds::default();
        let now = Utc::now();
        let mut state = HealthState::default();
        outcomes
            .iter()
            .map(|&ok| {
                state = next_health(&state, ok, now, &thresholds);
                state.status
            })
            .collect()
    }

    #[test]
    fn test_first_probe_leaves_unknown() {
        assert_eq!(run(&[true]), vec![ServerStatus::Healthy]);
        assert_eq!(run(&[false]), vec![ServerStatus::Unhealthy]);
    }

    #[test]
    fn test_failures_degrade_then_fail() {
        use ServerStatus::*;
        assert_eq!(
            run(&[true, false, false, false]),
            vec![Healthy, Degraded, Degraded, Unhealthy]
        );
    }

    #[test]
    fn test_degraded_recovers_on_one_success() {
        use ServerStatus::*;
        assert_eq!(run(&[true, false, true]), vec![Healthy, Degraded, Healthy]);
    }

    #[test]
    fn test_unhealthy_needs_full_recovery_streak() {
        use ServerStatus::*;
        // One success short of the threshold, then a failure resets the streak
        assert_eq!(
            run(&[true, false, false, false, true, false, true, true]),
            vec![Healthy, Degraded, Degraded, Unhealthy, Unhealthy, Unhealthy, Unhealthy, Healthy]
        );
    }

    #[test]
    fn test_offline_ignores_probes() {
        let state = HealthState {
            status: ServerStatus::Offline,
            ..HealthState::default()
        };
        let next = next_health(&state, true, Utc::now(), &HealthThresholds::default());
        assert_eq!(next, state);
    }

    #[test]
    fn test_last_healthy_only_moves_when_healthy() {
        let thresholds = HealthThresholds::default();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);

        let healthy = next_health(&HealthState::default(), true, t0, &thresholds);
        assert_eq!(healthy.last_healthy_at, Some(t0));

        let degraded = next_health(&healthy, false, t1, &thresholds);
        assert_eq!(degraded.last_healthy_at, Some(t0));
        assert_eq!(degraded.last_probe_at, Some(t1));
    }
}
