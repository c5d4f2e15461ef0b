//! Server selection and assignment bookkeeping
//!
//! Every mutation for a subscriber runs under that subscriber's lock. The
//! load counter on each server is the only state shared across subscribers
//! and is only changed atomically.

pub mod algorithms;
mod sticky;

pub use algorithms::{create_selector, SelectionContext, ServerSelector};
pub use sticky::StickyTable;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::analytics::PerformanceAnalytics;
use crate::clock::Clock;
use crate::config::BalancerConfig;
use crate::error::{FleetError, Result};
use crate::fleet::{publish, EventSender, ServerRegistry};
use crate::gateway::{ClientHandle, ClientSpec, GatewayError, PanelGateway};
use crate::models::{
    Algorithm, AssignmentKey, ChangeReason, FleetEvent, LoadBalancingPolicy, ProxyAssignment,
    ProxyServer, ServerId, ServerStatus, SubscriberConfig,
};
use crate::repository::AssignmentRepository;

/// Sticky window used when the subscriber has no rotation policy
pub const DEFAULT_STICKY_SECS: i64 = 600;

/// One placement decision for a subscriber slot
///
/// The caller must hold the subscriber lock.
#[derive(Debug, Clone)]
pub struct Placement<'a> {
    pub config: &'a SubscriberConfig,
    pub affinity_key: Option<String>,
    /// Assignment being superseded, as last read by the caller
    pub current: Option<ProxyAssignment>,
    pub exclude: Vec<ServerId>,
    pub reason: ChangeReason,
    /// Create a panel client for the new assignment
    pub provision: bool,
    /// Force the sticky flag; `None` means sticky iff an affinity key is set
    pub sticky: Option<bool>,
}

impl<'a> Placement<'a> {
    pub fn new(config: &'a SubscriberConfig, affinity_key: Option<String>) -> Self {
        Self {
            config,
            affinity_key,
            current: None,
            exclude: Vec::new(),
            reason: ChangeReason::Initial,
            provision: false,
            sticky: None,
        }
    }

    fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.config.subscriber_id.clone(), self.affinity_key.clone())
    }
}

pub struct LoadBalancer {
    registry: Arc<ServerRegistry>,
    analytics: Arc<PerformanceAnalytics>,
    assignments: Arc<dyn AssignmentRepository>,
    gateway: Arc<dyn PanelGateway>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    sticky: StickyTable,
    selectors: HashMap<Algorithm, Box<dyn ServerSelector>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: BalancerConfig,
}

impl LoadBalancer {
    pub fn new(
        config: BalancerConfig,
        registry: Arc<ServerRegistry>,
        analytics: Arc<PerformanceAnalytics>,
        assignments: Arc<dyn AssignmentRepository>,
        gateway: Arc<dyn PanelGateway>,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let selectors = Algorithm::ALL
            .into_iter()
            .map(|a| (a, create_selector(a)))
            .collect();

        Self {
            registry,
            analytics,
            assignments,
            gateway,
            events,
            clock,
            sticky: StickyTable::new(),
            selectors,
            locks: DashMap::new(),
            config,
        }
    }

    /// Serialize every assignment change for one subscriber
    pub async fn lock_subscriber(&self, subscriber_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(subscriber_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop subscriber locks nobody holds or waits on
    ///
    /// Holders and waiters keep a clone of the lock, and cloning happens under
    /// the map's shard lock, so an unshared entry can be recreated safely.
    pub fn prune_idle_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn sticky(&self) -> &StickyTable {
        &self.sticky
    }

    /// Pick a server for the subscriber slot and record the assignment
    ///
    /// A live sticky assignment is returned unchanged.
    #[instrument(skip(self, config), fields(subscriber = %config.subscriber_id))]
    pub async fn select_server(
        &self,
        config: &SubscriberConfig,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let _guard = self.lock_subscriber(&config.subscriber_id).await;

        let mut placement = Placement::new(config, affinity_key);
        if let Some(held) = self.live_sticky(&placement.key()) {
            debug!(server_id = held.server_id, "Returning sticky assignment");
            return Ok(held);
        }

        placement.current = self.assignments.active_assignment(&placement.key()).await?;
        if placement.current.is_some() {
            placement.reason = ChangeReason::Manual;
        }
        self.place(placement).await
    }

    /// Select a server and create the subscriber's client on its panel
    ///
    /// Servers whose panel refuses are excluded and the selection retried.
    #[instrument(skip(self, config), fields(subscriber = %config.subscriber_id))]
    pub async fn provision(
        &self,
        config: &SubscriberConfig,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let _guard = self.lock_subscriber(&config.subscriber_id).await;

        let mut placement = Placement::new(config, affinity_key);
        if let Some(held) = self.live_sticky(&placement.key()) {
            if held.client_handle.is_some() {
                return Ok(held);
            }
        }

        placement.current = self.assignments.active_assignment(&placement.key()).await?;
        if placement.current.is_some() {
            placement.reason = ChangeReason::Manual;
        }
        placement.provision = true;
        self.place(placement).await
    }

    /// End the active assignment for the slot without a successor
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        subscriber_id: &str,
        affinity_key: Option<String>,
    ) -> Result<ProxyAssignment> {
        let _guard = self.lock_subscriber(subscriber_id).await;
        let key = AssignmentKey::new(subscriber_id, affinity_key);

        let current = self
            .assignments
            .active_assignment(&key)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("active assignment for {}", key)))?;

        let ended = self.swap(&key, Some(current), None).await?;
        let ended = ended.ok_or_else(|| {
            FleetError::NotFound(format!("active assignment for {}", key))
        })?;

        if let Some(server) = self.registry.get(ended.server_id) {
            server.release();
            self.delete_client(&server, &ended).await;
        }
        self.sticky.remove(&key);

        info!(server_id = ended.server_id, "Released assignment");
        publish(
            &self.events,
            FleetEvent::AssignmentChanged {
                subscriber_id: key.subscriber_id.clone(),
                affinity_key: key.affinity_key.clone(),
                from: Some(ended.server_id),
                to: None,
                reason: ChangeReason::Released,
                at: self.clock.now(),
            },
        );
        Ok(ended)
    }

    /// Choose, optionally provision, and commit one placement
    pub(crate) async fn place(&self, placement: Placement<'_>) -> Result<ProxyAssignment> {
        let key = placement.key();
        let policy = placement.config.load_balancing_or_default();
        let mut exclude = placement.exclude.clone();

        let attempts = if placement.provision {
            1 + self.config.max_failover_retries
        } else {
            1
        };

        for attempt in 0..attempts {
            let server = self.choose(&policy, &placement.config.subscriber_id, &exclude)?;

            let handle = if placement.provision {
                match self.create_client(&server, &placement).await {
                    Ok(handle) => Some(handle),
                    Err(GatewayError::Unsupported(op)) => {
                        server.release();
                        return Err(GatewayError::Unsupported(op).into());
                    }
                    Err(e) => {
                        warn!(
                            server_id = server.id,
                            attempt,
                            "Panel refused client creation, failing over: {}",
                            e
                        );
                        server.release();
                        exclude.push(server.id);
                        continue;
                    }
                }
            } else {
                None
            };

            let next = self.build(&placement, &server, handle);
            return match self.commit(&key, placement.current.clone(), next, placement.reason).await {
                Ok(committed) => Ok(committed),
                Err(e) => {
                    server.release();
                    Err(e)
                }
            };
        }

        Err(FleetError::Capacity(format!(
            "no server accepted a client for {} after {} attempts",
            key, attempts
        )))
    }

    /// Candidate servers for a policy, ordered by ascending id
    ///
    /// Healthy servers first; with failover, the Degraded then Unhealthy tier
    /// contributes its most recently healthy server.
    pub fn candidates(
        &self,
        policy: &LoadBalancingPolicy,
        exclude: &[ServerId],
    ) -> Result<Vec<Arc<ProxyServer>>> {
        let eligible: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|s| !exclude.contains(&s.id) && s.has_capacity())
            .collect();

        let healthy: Vec<_> = eligible
            .iter()
            .filter(|s| s.status() == ServerStatus::Healthy)
            .cloned()
            .collect();

        if !healthy.is_empty() {
            if policy.health_check {
                let within: Vec<_> = healthy
                    .iter()
                    .filter(|s| self.within_thresholds(s, policy))
                    .cloned()
                    .collect();
                if !within.is_empty() {
                    return Ok(within);
                }
            }
            return Ok(healthy);
        }

        if policy.failover {
            for tier in [ServerStatus::Degraded, ServerStatus::Unhealthy] {
                let best = eligible
                    .iter()
                    .filter(|s| s.status() == tier)
                    .min_by(|a, b| {
                        let (ha, hb) = (a.health().last_healthy_at, b.health().last_healthy_at);
                        hb.cmp(&ha).then(a.id.cmp(&b.id))
                    });
                if let Some(server) = best {
                    debug!(server_id = server.id, tier = %tier, "Failing over");
                    return Ok(vec![server.clone()]);
                }
            }
        }

        Err(FleetError::Capacity(
            "no healthy server with free capacity".into(),
        ))
    }

    /// Drop sticky entries pinned to a server that stopped serving
    pub fn handle_event(&self, event: &FleetEvent) {
        if let FleetEvent::ServerStatusChanged { server_id, to, .. } = event {
            if matches!(to, ServerStatus::Unhealthy | ServerStatus::Offline) {
                let purged = self.sticky.purge_server(*server_id);
                if purged > 0 {
                    info!(server_id, purged, "Purged sticky sessions for failed server");
                }
            }
        }
    }

    /// Rebuild the sticky table from persisted assignments
    pub fn restore_sticky(&self, active: &[ProxyAssignment]) {
        let now = self.clock.now();
        for assignment in active.iter().filter(|a| a.holds_sticky(now)) {
            self.sticky.insert(assignment.clone());
        }
    }

    /// Recent latency and error rate are inside the policy limits; unobserved servers pass
    fn within_thresholds(&self, server: &ProxyServer, policy: &LoadBalancingPolicy) -> bool {
        match self.analytics.recent_stats(server.id) {
            Some(stats) => {
                stats.mean_latency_ms <= policy.response_threshold_ms as f64
                    && stats.error_rate <= policy.error_threshold
            }
            None => true,
        }
    }

    fn live_sticky(&self, key: &AssignmentKey) -> Option<ProxyAssignment> {
        let held = self.sticky.get(key, self.clock.now())?;
        let usable = self
            .registry
            .get(held.server_id)
            .map(|s| !matches!(s.status(), ServerStatus::Unhealthy | ServerStatus::Offline))
            .unwrap_or(false);
        if usable {
            Some(held)
        } else {
            self.sticky.remove(key);
            None
        }
    }

    /// Run the policy's algorithm and take one load slot on the winner
    fn choose(
        &self,
        policy: &LoadBalancingPolicy,
        subscriber_id: &str,
        exclude: &[ServerId],
    ) -> Result<Arc<ProxyServer>> {
        let selector = self.selectors.get(&policy.algorithm).ok_or_else(|| {
            FleetError::Internal(format!("no selector for {}", policy.algorithm))
        })?;

        let mut skipped = exclude.to_vec();
        loop {
            let pool = self.candidates(policy, &skipped)?;
            let scores = if policy.algorithm == Algorithm::PerformanceBased {
                self.analytics.scores(pool.iter().map(|s| s.id))
            } else {
                HashMap::new()
            };
            let ctx = SelectionContext {
                subscriber_id,
                preferred_region: policy.preferred_region.as_deref(),
                scores: &scores,
            };

            let server = selector
                .select(&pool, &ctx)
                .ok_or_else(|| FleetError::Capacity("empty candidate pool".into()))?;

            if server.try_acquire() {
                debug!(server_id = server.id, algorithm = %policy.algorithm, "Selected server");
                return Ok(server);
            }
            // Filled up between filtering and acquiring
            skipped.push(server.id);
        }
    }

    fn build(
        &self,
        placement: &Placement<'_>,
        server: &ProxyServer,
        handle: Option<ClientHandle>,
    ) -> ProxyAssignment {
        let now = self.clock.now();
        let rotation = placement.config.rotation.as_ref();
        let sticky = placement
            .sticky
            .unwrap_or(placement.affinity_key.is_some());
        let sticky_for = rotation
            .map(|r| r.sticky_duration())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_STICKY_SECS));

        ProxyAssignment {
            id: Uuid::new_v4(),
            subscriber_id: placement.config.subscriber_id.clone(),
            affinity_key: placement.affinity_key.clone(),
            server_id: server.id,
            activated_at: now,
            expires_at: rotation
                .filter(|r| r.trigger.uses_interval())
                .map(|r| later(now, r.interval())),
            sticky,
            sticky_until: sticky.then(|| later(now, sticky_for)),
            client_handle: handle.map(|h| h.0),
        }
    }

    /// Persist `next` in place of the current assignment and settle bookkeeping
    async fn commit(
        &self,
        key: &AssignmentKey,
        current: Option<ProxyAssignment>,
        next: ProxyAssignment,
        reason: ChangeReason,
    ) -> Result<ProxyAssignment> {
        let previous = self.swap(key, current, Some(&next)).await?;

        if let Some(prev) = &previous {
            if let Some(server) = self.registry.get(prev.server_id) {
                server.release();
                if prev.client_handle.is_some() && prev.client_handle != next.client_handle {
                    self.delete_client(&server, prev).await;
                }
            }
        }

        if next.sticky {
            self.sticky.insert(next.clone());
        } else {
            self.sticky.remove(key);
        }

        info!(
            subscriber = %key,
            from = ?previous.as_ref().map(|p| p.server_id),
            to = next.server_id,
            ?reason,
            "Assignment changed"
        );
        publish(
            &self.events,
            FleetEvent::AssignmentChanged {
                subscriber_id: key.subscriber_id.clone(),
                affinity_key: key.affinity_key.clone(),
                from: previous.as_ref().map(|p| p.server_id),
                to: Some(next.server_id),
                reason,
                at: next.activated_at,
            },
        );
        Ok(next)
    }

    /// Compare-and-swap with one retry on conflict
    ///
    /// Returns the assignment that was actually superseded.
    async fn swap(
        &self,
        key: &AssignmentKey,
        current: Option<ProxyAssignment>,
        next: Option<&ProxyAssignment>,
    ) -> Result<Option<ProxyAssignment>> {
        let mut expected = current;
        for retry in 0..2 {
            let at = self.clock.now();
            match self
                .assignments
                .replace_assignment(key, expected.as_ref().map(|a| a.id), next, at)
                .await
            {
                Ok(()) => return Ok(expected),
                Err(FleetError::ConcurrencyConflict { .. }) if retry == 0 => {
                    warn!(subscriber = %key, "Assignment changed underneath, retrying once");
                    expected = self.assignments.active_assignment(key).await?;
                    if next.is_none() && expected.is_none() {
                        return Ok(None);
                    }
                }
                Err(FleetError::ConcurrencyConflict { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Err(FleetError::Internal(format!(
            "assignment for {} kept changing concurrently",
            key
        )))
    }

    async fn create_client(
        &self,
        server: &ProxyServer,
        placement: &Placement<'_>,
    ) -> std::result::Result<ClientHandle, GatewayError> {
        let spec = ClientSpec {
            subscriber_id: placement.config.subscriber_id.clone(),
            affinity_key: placement.affinity_key.clone(),
            options: placement.config.options.clone(),
        };
        self.gateway.create_client(server, &spec).await
    }

    async fn delete_client(&self, server: &ProxyServer, assignment: &ProxyAssignment) {
        if let Some(handle) = &assignment.client_handle {
            let handle = ClientHandle(handle.clone());
            if let Err(e) = self.gateway.delete_client(server, &handle).await {
                warn!(server_id = server.id, client = %handle, "Failed to delete panel client: {}", e);
            }
        }
    }
}

/// Sticky deadline for a rotated assignment that keeps its session
pub fn carries_sticky(
    previous: &ProxyAssignment,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    previous.sticky
        && previous
            .sticky_until
            .map(|until| now <= later(until, grace))
            .unwrap_or(false)
}

/// `at + by`, saturating at the latest representable instant
pub fn later(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
