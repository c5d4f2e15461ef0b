//! Performance analytics
//!
//! Probe results and traffic samples go through a bounded ingest buffer that
//! drops the oldest sample when full (and counts it). A background drain
//! folds them into minute/hour/day buckets; closed windows are persisted and
//! the recent minute windows feed server scores.

mod buckets;
mod forecast;

pub use buckets::{Accumulator, BucketSet};
pub use forecast::{forecast, linear_regression, score_from, ScoreWeights, NEUTRAL_SCORE};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::models::{
    Forecast, Granularity, PerformanceWindow, Sample, ServerId, TrafficSample,
};
use crate::repository::PerformanceRepository;

/// Closed minute windows kept in memory per server for scoring
pub const SCORE_WINDOWS: usize = 15;

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub closed: usize,
}

/// Aggregate latency and error rate over a server's recent windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecentStats {
    pub samples: u64,
    pub mean_latency_ms: f64,
    /// Percent
    pub error_rate: f64,
}

#[derive(Default)]
struct AnalyticsState {
    buckets: BucketSet,
    recent: HashMap<ServerId, VecDeque<PerformanceWindow>>,
}

impl AnalyticsState {
    fn remember(&mut self, closed: &[PerformanceWindow]) {
        for window in closed.iter().filter(|w| w.granularity == Granularity::Minute) {
            let recent = self.recent.entry(window.server_id).or_default();
            recent.push_back(window.clone());
            while recent.len() > SCORE_WINDOWS {
                recent.pop_front();
            }
        }
    }
}

#[derive(Default)]
struct SubscriberStats {
    since_rotation: AtomicU64,
    total: AtomicU64,
    /// Request outcomes inside the sliding error window
    outcomes: Mutex<VecDeque<(DateTime<Utc>, bool)>>,
}

pub struct PerformanceAnalytics {
    config: AnalyticsConfig,
    weights: ScoreWeights,
    repo: Arc<dyn PerformanceRepository>,
    clock: Arc<dyn Clock>,
    tx: broadcast::Sender<Sample>,
    rx: Mutex<broadcast::Receiver<Sample>>,
    dropped: AtomicU64,
    state: Mutex<AnalyticsState>,
    subscribers: DashMap<String, SubscriberStats>,
}

impl PerformanceAnalytics {
    pub fn new(
        config: AnalyticsConfig,
        repo: Arc<dyn PerformanceRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = broadcast::channel(config.buffer_capacity.max(1));
        let weights = ScoreWeights {
            latency: config.latency_weight,
            error: config.error_weight,
            reference_latency_ms: config.reference_latency_ms,
        };

        Self {
            config,
            weights,
            repo,
            clock,
            tx,
            rx: Mutex::new(rx),
            dropped: AtomicU64::new(0),
            state: Mutex::new(AnalyticsState::default()),
            subscribers: DashMap::new(),
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Queue a sample for aggregation; never blocks
    pub fn ingest(&self, sample: Sample) {
        // The receiver lives in self, so send only fails if it was dropped
        let _ = self.tx.send(sample);
    }

    /// Record a request made through the fleet by a subscriber
    pub fn record_request(&self, sample: TrafficSample) {
        if let Some(subscriber_id) = &sample.subscriber_id {
            let stats = self.subscribers.entry(subscriber_id.clone()).or_default();
            stats.since_rotation.fetch_add(1, Ordering::Relaxed);
            stats.total.fetch_add(1, Ordering::Relaxed);

            let mut outcomes = stats.outcomes.lock();
            outcomes.push_back((sample.timestamp, sample.success));
            prune(&mut outcomes, sample.timestamp - self.error_window());
        }
        self.ingest(Sample::Traffic(sample));
    }

    /// Samples lost to buffer overflow since startup
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Fold every buffered sample into the buckets and persist closed windows
    pub async fn drain(&self) -> DrainReport {
        let samples = {
            let mut rx = self.rx.lock();
            let mut samples = Vec::new();
            loop {
                match rx.try_recv() {
                    Ok(sample) => samples.push(sample),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        self.dropped.fetch_add(n, Ordering::Relaxed);
                        warn!(dropped = n, "Analytics buffer overflowed, oldest samples dropped");
                    }
                    Err(_) => break,
                }
            }
            samples
        };

        let closed = {
            let mut state = self.state.lock();
            let closed: Vec<_> = samples
                .iter()
                .flat_map(|s| state.buckets.ingest(s))
                .collect();
            state.remember(&closed);
            closed
        };

        self.persist(&closed).await;
        DrainReport {
            processed: samples.len(),
            closed: closed.len(),
        }
    }

    /// Close buckets whose period has ended even if no new sample arrived
    pub async fn close_elapsed(&self) -> usize {
        let now = self.clock.now();
        let closed = {
            let mut state = self.state.lock();
            let closed = state.buckets.close_elapsed(now);
            state.remember(&closed);
            closed
        };
        self.persist(&closed).await;
        closed.len()
    }

    /// Latency and error rate over the recent minute windows plus the open one
    pub fn recent_stats(&self, server_id: ServerId) -> Option<RecentStats> {
        let state = self.state.lock();
        let mut acc = Accumulator::default();
        let mut latency_total = 0.0;
        let mut error_total = 0.0;

        let open = state.buckets.open_window(server_id, Granularity::Minute);
        let recent = state.recent.get(&server_id);
        for window in recent.into_iter().flatten().chain(open.iter()) {
            acc.count += window.sample_count;
            latency_total += window.mean_latency_ms * window.sample_count as f64;
            error_total += window.error_rate * window.sample_count as f64;
        }

        if acc.count == 0 {
            return None;
        }
        let n = acc.count as f64;
        Some(RecentStats {
            samples: acc.count,
            mean_latency_ms: latency_total / n,
            error_rate: error_total / n * 100.0,
        })
    }

    /// Server score in 0..=100; neutral when nothing has been observed
    pub fn score(&self, server_id: ServerId) -> f64 {
        match self.recent_stats(server_id) {
            Some(stats) => score_from(
                stats.mean_latency_ms,
                stats.error_rate / 100.0,
                &self.weights,
            ),
            None => NEUTRAL_SCORE,
        }
    }

    pub fn scores(&self, servers: impl IntoIterator<Item = ServerId>) -> HashMap<ServerId, f64> {
        servers.into_iter().map(|id| (id, self.score(id))).collect()
    }

    /// Subscriber error rate in percent over the sliding window, 0 when idle
    pub fn error_rate(&self, subscriber_id: &str) -> f64 {
        let Some(stats) = self.subscribers.get(subscriber_id) else {
            return 0.0;
        };
        let mut outcomes = stats.outcomes.lock();
        prune(&mut outcomes, self.clock.now() - self.error_window());

        if outcomes.is_empty() {
            return 0.0;
        }
        let failed = outcomes.iter().filter(|(_, ok)| !ok).count();
        failed as f64 / outcomes.len() as f64 * 100.0
    }

    pub fn requests_since_rotation(&self, subscriber_id: &str) -> u64 {
        self.subscribers
            .get(subscriber_id)
            .map(|s| s.since_rotation.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total_requests(&self, subscriber_id: &str) -> u64 {
        self.subscribers
            .get(subscriber_id)
            .map(|s| s.total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Start fresh counters after the subscriber moved to new servers
    pub fn reset_after_rotation(&self, subscriber_id: &str) {
        if let Some(stats) = self.subscribers.get(subscriber_id) {
            stats.since_rotation.store(0, Ordering::Relaxed);
            stats.outcomes.lock().clear();
        }
    }

    /// Drop the counters of a subscriber that holds no assignment
    pub fn forget_subscriber(&self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
    }

    pub fn tracked_subscribers(&self) -> usize {
        self.subscribers.len()
    }

    /// Closed windows since `since`, followed by the open partial window
    pub async fn windows(
        &self,
        server_id: ServerId,
        granularity: Granularity,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceWindow>> {
        let mut windows = self.repo.windows(server_id, granularity, since).await?;
        let open = self.state.lock().buckets.open_window(server_id, granularity);
        if let Some(open) = open.filter(|w| w.start >= since) {
            windows.push(open);
        }
        Ok(windows)
    }

    /// Project latency over the next `horizon_days` from the last 30 days
    pub async fn forecast(&self, server_id: ServerId, horizon_days: u32) -> Result<Option<Forecast>> {
        let since = self.clock.now() - Duration::days(30);
        let days = self.windows(server_id, Granularity::Day, since).await?;
        Ok(forecast(server_id, &days, horizon_days))
    }

    /// Drop in-memory state for a decommissioned server
    pub fn forget_server(&self, server_id: ServerId) {
        let mut state = self.state.lock();
        state.buckets.forget(server_id);
        state.recent.remove(&server_id);
    }

    /// Drain the ingest buffer on an interval until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting analytics drain with {}ms interval",
            self.config.drain_interval.as_millis()
        );

        let mut ticker = interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.drain().await;
                    let elapsed = self.close_elapsed().await;
                    if report.processed > 0 || elapsed > 0 {
                        debug!(
                            processed = report.processed,
                            closed = report.closed + elapsed,
                            "Analytics drain pass"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Flush what is already buffered before stopping
                        self.drain().await;
                        info!("Analytics drain shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn error_window(&self) -> Duration {
        Duration::from_std(self.config.error_window).unwrap_or_else(|_| Duration::minutes(5))
    }

    async fn persist(&self, closed: &[PerformanceWindow]) {
        if closed.is_empty() {
            return;
        }
        if let Err(e) = self.repo.store_windows(closed).await {
            warn!(windows = closed.len(), "Failed to persist performance windows: {}", e);
        }
    }
}

fn prune(outcomes: &mut VecDeque<(DateTime<Utc>, bool)>, cutoff: DateTime<Utc>) {
    while outcomes.front().map(|(at, _)| *at < cutoff).unwrap_or(false) {
        outcomes.pop_front();
    }
}

/// Guard for managing the analytics drain lifecycle
pub struct AnalyticsHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl AnalyticsHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for AnalyticsHandle {
    fn default() -> Self {
        Self::new().0
    }
}
