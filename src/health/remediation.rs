use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{error, warn};

use crate::error::Result;
use crate::models::{FleetEvent, ProxyServer, ServerId};

/// Receives alerts for an operator (pager, chat, mail, ...)
pub trait AlertSink: Send + Sync {
    fn alert(&self, event: &FleetEvent);
}

/// Logs alerts through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, event: &FleetEvent) {
        match event {
            FleetEvent::RemediationExhausted {
                server_id, attempts, ..
            } => {
                error!(
                    server_id,
                    attempts, "Automatic remediation exhausted, manual action required"
                );
            }
            FleetEvent::ServerStatusChanged {
                server_id, from, to, ..
            } => {
                warn!(server_id, %from, %to, "Server status changed");
            }
            other => warn!(event = ?other, "Fleet alert"),
        }
    }
}

/// External remediation action, e.g. restarting a node through its provider
#[async_trait]
pub trait RemediationHook: Send + Sync {
    async fn remediate(&self, server: &ProxyServer) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Hook invoked; carries the attempt number within the current window
    Attempted(u32),
    /// Attempt budget just ran out; an alert was raised
    Exhausted,
    /// Budget already spent and alerted; nothing done
    Suppressed,
    /// No hook configured
    Disabled,
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    window_start: DateTime<Utc>,
    attempts: u32,
    alerted: bool,
}

/// Rate-limits remediation: at most `max_attempts` per `cooldown` per server
pub struct Remediator {
    hook: Option<Arc<dyn RemediationHook>>,
    max_attempts: u32,
    cooldown: Duration,
    budgets: DashMap<ServerId, Budget>,
}

impl Remediator {
    pub fn new(
        hook: Option<Arc<dyn RemediationHook>>,
        max_attempts: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            hook,
            max_attempts,
            cooldown,
            budgets: DashMap::new(),
        }
    }

    pub fn hook(&self) -> Option<&Arc<dyn RemediationHook>> {
        self.hook.as_ref()
    }

    /// Claim the next step for `server_id` at `now`
    pub(crate) fn claim(&self, server_id: ServerId, now: DateTime<Utc>) -> RemediationOutcome {
        if self.hook.is_none() {
            return RemediationOutcome::Disabled;
        }

        let mut budget = self.budgets.entry(server_id).or_insert(Budget {
            window_start: now,
            attempts: 0,
            alerted: false,
        });

        if now - budget.window_start >= self.cooldown {
            *budget = Budget {
                window_start: now,
                attempts: 0,
                alerted: false,
            };
        }

        if budget.attempts < self.max_attempts {
            budget.attempts += 1;
            RemediationOutcome::Attempted(budget.attempts)
        } else if !budget.alerted {
            budget.alerted = true;
            RemediationOutcome::Exhausted
        } else {
            RemediationOutcome::Suppressed
        }
    }

    /// Forget the budget once the server is healthy again
    pub fn reset(&self, server_id: ServerId) {
        self.budgets.remove(&server_id);
    }

    pub fn attempts(&self, server_id: ServerId) -> u32 {
        self.budgets.get(&server_id).map(|b| b.attempts).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHook;

    #[async_trait]
    impl RemediationHook for NoopHook {
        async fn remediate(&self, _server: &ProxyServer) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_budget_caps_attempts_and_alerts_once() {
        let remediator = Remediator::new(Some(Arc::new(NoopHook)), 3, Duration::seconds(900));
        let now = Utc::now();

        assert_eq!(remediator.claim(1, now), RemediationOutcome::Attempted(1));
        assert_eq!(remediator.claim(1, now), RemediationOutcome::Attempted(2));
        assert_eq!(remediator.claim(1, now), RemediationOutcome::Attempted(3));
        assert_eq!(remediator.claim(1, now), RemediationOutcome::Exhausted);
        assert_eq!(remediator.claim(1, now), RemediationOutcome::Suppressed);

        // Other servers have their own budget
        assert_eq!(remediator.claim(2, now), RemediationOutcome::Attempted(1));

        // A new window opens after the cooldown
        let later = now + Duration::seconds(900);
        assert_eq!(remediator.claim(1, later), RemediationOutcome::Attempted(1));
    }

    #[test]
    fn test_reset_and_disabled() {
        let remediator = Remediator::new(Some(Arc::new(NoopHook)), 1, Duration::seconds(60));
        let now = Utc::now();
        remediator.claim(7, now);
        assert_eq!(remediator.attempts(7), 1);
        remediator.reset(7);
        assert_eq!(remediator.attempts(7), 0);

        let disabled = Remediator::new(None, 3, Duration::seconds(60));
        assert_eq!(disabled.claim(7, now), RemediationOutcome::Disabled);
    }
}
