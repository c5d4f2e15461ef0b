//! Rotation scheduling
//!
//! `evaluate` decides whether a subscriber is due; `rotate` performs the
//! change under the subscriber lock and is idempotent within the cooldown.
//! Both the periodic sweep and the request path end up in `rotate`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::analytics::PerformanceAnalytics;
use crate::balancer::{carries_sticky, LoadBalancer, Placement};
use crate::clock::Clock;
use crate::config::RotationConfig;
use crate::error::{FleetError, Result};
use crate::fleet::{publish, EventSender, ServerRegistry};
use crate::models::{ChangeReason, FleetEvent, ProxyAssignment, RotationPolicy};
use crate::repository::AssignmentRepository;
use crate::store::ConfigurationStore;

/// Repeats of the same skip reason are published at most this often
pub const SKIP_EVENT_QUIET_SECS: i64 = 60;

/// Why a rotation was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    Interval,
    RequestLimit,
    ErrorRate,
    Expired,
    Manual,
}

impl From<RotationReason> for ChangeReason {
    fn from(reason: RotationReason) -> Self {
        match reason {
            RotationReason::Interval => ChangeReason::Interval,
            RotationReason::RequestLimit => ChangeReason::RequestLimit,
            RotationReason::ErrorRate => ChangeReason::ErrorRate,
            RotationReason::Expired => ChangeReason::Expired,
            RotationReason::Manual => ChangeReason::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RotationDecision {
    pub due: bool,
    pub reason: Option<RotationReason>,
}

impl RotationDecision {
    fn not_due() -> Self {
        Self {
            due: false,
            reason: None,
        }
    }

    fn due(reason: RotationReason) -> Self {
        Self {
            due: true,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RotationOutcome {
    Rotated { changes: Vec<ProxyAssignment> },
    Skipped { reason: String },
}

impl RotationOutcome {
    pub fn is_rotated(&self) -> bool {
        matches!(self, RotationOutcome::Rotated { .. })
    }
}

/// Summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub rotated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RotationState {
    pub last_rotation: Option<DateTime<Utc>>,
    pub last_error_rotation: Option<DateTime<Utc>>,
}

pub struct RotationScheduler {
    store: Arc<ConfigurationStore>,
    balancer: Arc<LoadBalancer>,
    analytics: Arc<PerformanceAnalytics>,
    assignments: Arc<dyn AssignmentRepository>,
    registry: Arc<ServerRegistry>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    config: RotationConfig,
    state: DashMap<String, RotationState>,
    /// Last published skip per subscriber
    skips: DashMap<String, (String, DateTime<Utc>)>,
}

impl RotationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RotationConfig,
        store: Arc<ConfigurationStore>,
        balancer: Arc<LoadBalancer>,
        analytics: Arc<PerformanceAnalytics>,
        assignments: Arc<dyn AssignmentRepository>,
        registry: Arc<ServerRegistry>,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            balancer,
            analytics,
            assignments,
            registry,
            events,
            clock,
            config,
            state: DashMap::new(),
            skips: DashMap::new(),
        }
    }

    pub fn state(&self, subscriber_id: &str) -> RotationState {
        self.state
            .get(subscriber_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Drop rotation bookkeeping for a subscriber that holds no assignment
    pub fn forget_subscriber(&self, subscriber_id: &str) {
        self.state.remove(subscriber_id);
        self.skips.remove(subscriber_id);
    }

    pub fn tracked_subscribers(&self) -> usize {
        self.state.len()
    }

    /// Whether the subscriber's policy says a rotation is due now
    ///
    /// The error-rate path is checked first and bypasses the interval.
    pub async fn evaluate(&self, subscriber_id: &str) -> Result<RotationDecision> {
        let Some(policy) = self.store.get(subscriber_id).and_then(|c| c.rotation.clone()) else {
            return Ok(RotationDecision::not_due());
        };

        let now = self.clock.now();
        let state = self.state(subscriber_id);

        let error_rate = self.analytics.error_rate(subscriber_id);
        let error_cooled = state
            .last_error_rotation
            .map(|at| now - at >= policy.cooldown())
            .unwrap_or(true);
        if error_rate > policy.error_threshold && error_cooled {
            return Ok(RotationDecision::due(RotationReason::ErrorRate));
        }

        if policy.trigger.uses_interval() {
            let anchor = match state.last_rotation {
                Some(at) => Some(at),
                None => self
                    .assignments
                    .active_for_subscriber(subscriber_id)
                    .await?
                    .iter()
                    .map(|a| a.activated_at)
                    .max(),
            };
            if anchor.map(|at| now - at >= policy.interval()).unwrap_or(false) {
                return Ok(RotationDecision::due(RotationReason::Interval));
            }
        }

        if policy.trigger.uses_requests()
            && self.analytics.requests_since_rotation(subscriber_id) >= policy.max_requests
        {
            return Ok(RotationDecision::due(RotationReason::RequestLimit));
        }

        Ok(RotationDecision::not_due())
    }

    /// Move every active assignment of the subscriber to another server
    #[instrument(skip(self))]
    pub async fn rotate(
        &self,
        subscriber_id: &str,
        reason: RotationReason,
    ) -> Result<RotationOutcome> {
        let config = self.store.get(subscriber_id).ok_or_else(|| {
            FleetError::Configuration(format!("rotation is not enabled for {}", subscriber_id))
        })?;
        let policy: RotationPolicy = config.rotation.clone().ok_or_else(|| {
            FleetError::Configuration(format!("rotation is not enabled for {}", subscriber_id))
        })?;

        let _guard = self.balancer.lock_subscriber(subscriber_id).await;
        let now = self.clock.now();
        let state = self.state(subscriber_id);

        if let Some(last) = state.last_rotation {
            if now - last < policy.cooldown() {
                return Ok(self.skip(subscriber_id, "cooldown active"));
            }
        }
        if self.registry.serving_count() <= 1 {
            return Ok(self.skip(subscriber_id, "no alternative serving server"));
        }

        let active = self.assignments.active_for_subscriber(subscriber_id).await?;
        if active.is_empty() {
            return Ok(self.skip(subscriber_id, "no active assignment"));
        }

        let grace = Duration::from_std(self.config.sticky_grace).unwrap_or_else(|_| Duration::zero());
        let mut changes = Vec::new();
        let mut failure = None;

        for current in active {
            let carry = carries_sticky(&current, now, grace);
            let placement = Placement {
                config: &config,
                affinity_key: current.affinity_key.clone(),
                exclude: vec![current.server_id],
                reason: reason.into(),
                provision: current.client_handle.is_some(),
                sticky: Some(carry),
                current: Some(current),
            };

            match self.balancer.place(placement).await {
                Ok(next) => changes.push(next),
                Err(FleetError::Capacity(msg)) => {
                    warn!(subscriber = %subscriber_id, "Keeping current server: {}", msg);
                }
                Err(e) => {
                    error!(subscriber = %subscriber_id, "Rotation step failed: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }

        if changes.is_empty() {
            return match failure {
                Some(e) => Err(e),
                None => Ok(self.skip(subscriber_id, "no eligible alternative server")),
            };
        }

        self.state.insert(
            subscriber_id.to_string(),
            RotationState {
                last_rotation: Some(now),
                last_error_rotation: if reason == RotationReason::ErrorRate {
                    Some(now)
                } else {
                    state.last_error_rotation
                },
            },
        );
        self.skips.remove(subscriber_id);
        self.analytics.reset_after_rotation(subscriber_id);

        info!(
            subscriber = %subscriber_id,
            ?reason,
            changed = changes.len(),
            "Rotated subscriber"
        );
        Ok(RotationOutcome::Rotated { changes })
    }

    /// Evaluate every rotating subscriber and rotate expired assignments
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut due: Vec<(String, RotationReason)> = Vec::new();
        let mut seen = BTreeSet::new();

        for config in self.store.rotating_subscribers() {
            report.evaluated += 1;
            match self.evaluate(&config.subscriber_id).await {
                Ok(RotationDecision {
                    reason: Some(reason),
                    ..
                }) => {
                    seen.insert(config.subscriber_id.clone());
                    due.push((config.subscriber_id.clone(), reason));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(subscriber = %config.subscriber_id, "Evaluation failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        match self.assignments.expiring_before(self.clock.now()).await {
            Ok(expired) => {
                for assignment in expired {
                    if seen.insert(assignment.subscriber_id.clone()) {
                        due.push((assignment.subscriber_id, RotationReason::Expired));
                    }
                }
            }
            Err(e) => warn!("Failed to read expiring assignments: {}", e),
        }

        for (subscriber_id, reason) in due {
            match self.rotate(&subscriber_id, reason).await {
                Ok(outcome) if outcome.is_rotated() => report.rotated += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!(subscriber = %subscriber_id, "Rotation failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        let pruned = self.balancer.prune_idle_locks();
        if pruned > 0 {
            debug!(pruned, "Pruned idle subscriber locks");
        }

        if report.rotated > 0 || report.failed > 0 {
            info!(
                evaluated = report.evaluated,
                rotated = report.rotated,
                skipped = report.skipped,
                failed = report.failed,
                "Rotation sweep complete"
            );
        } else {
            debug!(evaluated = report.evaluated, "Rotation sweep found nothing due");
        }
        report
    }

    /// Sweep on an interval until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting rotation sweep with {}s interval",
            self.config.sweep_interval.as_secs()
        );

        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Rotation sweep shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn skip(&self, subscriber_id: &str, reason: &str) -> RotationOutcome {
        let now = self.clock.now();
        let repeated = self
            .skips
            .get(subscriber_id)
            .map(|last| last.0 == reason && now - last.1 < Duration::seconds(SKIP_EVENT_QUIET_SECS))
            .unwrap_or(false);

        if repeated {
            debug!(subscriber = %subscriber_id, reason, "Rotation skipped again");
        } else {
            info!(subscriber = %subscriber_id, reason, "Rotation skipped");
            self.skips
                .insert(subscriber_id.to_string(), (reason.to_string(), now));
            publish(
                &self.events,
                FleetEvent::RotationSkipped {
                    subscriber_id: subscriber_id.to_string(),
                    reason: reason.to_string(),
                    at: now,
                },
            );
        }

        RotationOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}

/// Guard for managing the rotation sweep lifecycle
pub struct RotationHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RotationHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RotationHandle {
    fn default() -> Self {
        Self::new().0
    }
}
