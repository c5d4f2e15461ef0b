//! Periodic probing of every server through its panel

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::{next_health, HealthThresholds, RemediationOutcome, Remediator};
use crate::analytics::PerformanceAnalytics;
use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::{FleetError, Result};
use crate::fleet::{publish, EventSender, ServerRegistry};
use crate::gateway::PanelGateway;
use crate::health::AlertSink;
use crate::models::{
    ErrorClass, FleetEvent, HealthCheckResult, HealthState, ProxyServer, Sample, ServerId,
    ServerStatus,
};
use crate::repository::{HealthCheckRepository, ServerRepository};

/// Summary of one probe cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub transitions: usize,
}

pub struct HealthMonitor {
    registry: Arc<ServerRegistry>,
    gateway: Arc<dyn PanelGateway>,
    checks: Arc<dyn HealthCheckRepository>,
    servers: Arc<dyn ServerRepository>,
    analytics: Arc<PerformanceAnalytics>,
    alerts: Arc<dyn AlertSink>,
    remediator: Remediator,
    events: EventSender,
    clock: Arc<dyn Clock>,
    thresholds: HealthThresholds,
    config: HealthConfig,
}

impl HealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HealthConfig,
        registry: Arc<ServerRegistry>,
        gateway: Arc<dyn PanelGateway>,
        checks: Arc<dyn HealthCheckRepository>,
        servers: Arc<dyn ServerRepository>,
        analytics: Arc<PerformanceAnalytics>,
        alerts: Arc<dyn AlertSink>,
        remediator: Remediator,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            thresholds: HealthThresholds::from(&config),
            registry,
            gateway,
            checks,
            servers,
            analytics,
            alerts,
            remediator,
            events,
            clock,
            config,
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Probe one server and apply the outcome
    ///
    /// Failures are recorded, never returned: a probe always yields a result.
    #[instrument(skip(self, server), fields(server_id = server.id))]
    pub async fn probe(&self, server: &Arc<ProxyServer>) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self.gateway.test_connection(server).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (success, error_class) = match outcome {
            Ok(true) => (true, ErrorClass::None),
            Ok(false) => (false, ErrorClass::Rejected),
            Err(e) => {
                debug!("Probe failed: {}", e);
                (false, e.class())
            }
        };

        let result = HealthCheckResult {
            server_id: server.id,
            timestamp: self.clock.now(),
            latency_ms,
            success,
            error_class,
        };

        if let Err(e) = self.checks.record_health_check(&result).await {
            warn!("Failed to record health check: {}", e);
        }
        self.analytics.ingest(Sample::Probe(result.clone()));

        let thresholds = self.thresholds;
        let (previous, current) = server.update_health(|state| {
            next_health(state, success, result.timestamp, &thresholds)
        });

        self.persist(server).await;

        if previous.status != current.status {
            self.on_transition(server, previous.status, current.status)
                .await;
        }
        if current.status == ServerStatus::Unhealthy && !success {
            self.auto_remediate(server).await;
        }

        result
    }

    /// Probe every non-Offline server over a bounded worker pool
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let servers = self.registry.active();
        if servers.is_empty() {
            return CycleReport::default();
        }

        let workers = servers.len().min(self.config.max_concurrent_probes).max(1);
        debug!(servers = servers.len(), workers, "Starting probe cycle");

        let before: Vec<_> = servers.iter().map(|s| s.status()).collect();

        let results = futures::stream::iter(servers.iter().cloned())
            .map(|server| async move { self.probe(&server).await })
            .buffer_unordered(workers)
            .collect::<Vec<HealthCheckResult>>()
            .await;

        let transitions = servers
            .iter()
            .zip(before)
            .filter(|(server, status)| server.status() != *status)
            .count();
        let succeeded = results.iter().filter(|r| r.success).count();

        let report = CycleReport {
            probed: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            transitions,
        };

        info!(
            probed = report.probed,
            succeeded = report.succeeded,
            failed = report.failed,
            transitions = report.transitions,
            "Probe cycle complete"
        );
        report
    }

    /// Run the external remediation hook within the per-server budget
    pub async fn auto_remediate(&self, server: &Arc<ProxyServer>) -> RemediationOutcome {
        let now = self.clock.now();
        let outcome = self.remediator.claim(server.id, now);

        match outcome {
            RemediationOutcome::Attempted(attempt) => {
                publish(
                    &self.events,
                    FleetEvent::RemediationAttempted {
                        server_id: server.id,
                        attempt,
                        at: now,
                    },
                );
                if let Some(hook) = self.remediator.hook() {
                    info!(server_id = server.id, attempt, "Triggering remediation");
                    if let Err(e) = hook.remediate(server).await {
                        warn!(server_id = server.id, attempt, "Remediation hook failed: {}", e);
                    }
                }
            }
            RemediationOutcome::Exhausted => {
                let event = FleetEvent::RemediationExhausted {
                    server_id: server.id,
                    attempts: self.remediator.attempts(server.id),
                    at: now,
                };
                self.alerts.alert(&event);
                publish(&self.events, event);
            }
            RemediationOutcome::Suppressed | RemediationOutcome::Disabled => {}
        }

        outcome
    }

    /// Take a server out of rotation until an operator brings it back
    pub async fn set_offline(&self, server_id: ServerId) -> Result<ServerStatus> {
        let server = self.server(server_id)?;
        let (previous, _) = server.update_health(|state| HealthState {
            status: ServerStatus::Offline,
            ..state.clone()
        });

        self.persist(&server).await;
        if previous.status != ServerStatus::Offline {
            self.on_transition(&server, previous.status, ServerStatus::Offline)
                .await;
        }
        Ok(previous.status)
    }

    /// Return an Offline server to probing; it restarts from Unknown
    pub async fn bring_online(&self, server_id: ServerId) -> Result<ServerStatus> {
        let server = self.server(server_id)?;
        if server.status() != ServerStatus::Offline {
            return Err(FleetError::Configuration(format!(
                "server {} is not offline",
                server_id
            )));
        }

        let (previous, _) = server.update_health(|state| HealthState {
            status: ServerStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            ..state.clone()
        });

        self.remediator.reset(server_id);
        self.persist(&server).await;
        self.on_transition(&server, previous.status, ServerStatus::Unknown)
            .await;
        Ok(previous.status)
    }

    /// Run probe cycles until shutdown (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health monitor with {}s interval",
            self.config.poll_interval.as_secs()
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn server(&self, server_id: ServerId) -> Result<Arc<ProxyServer>> {
        self.registry
            .get(server_id)
            .ok_or_else(|| FleetError::NotFound(format!("server {}", server_id)))
    }

    async fn on_transition(&self, server: &ProxyServer, from: ServerStatus, to: ServerStatus) {
        info!(server_id = server.id, %from, %to, "Server status transition");

        let event = FleetEvent::ServerStatusChanged {
            server_id: server.id,
            from,
            to,
            at: self.clock.now(),
        };
        if matches!(to, ServerStatus::Unhealthy | ServerStatus::Offline) {
            self.alerts.alert(&event);
        }
        if to == ServerStatus::Healthy {
            self.remediator.reset(server.id);
        }
        publish(&self.events, event);
    }

    async fn persist(&self, server: &ProxyServer) {
        if let Err(e) = self.servers.upsert_server(&server.record()).await {
            error!(server_id = server.id, "Failed to persist server health: {}", e);
        }
    }
}

/// Guard for managing health monitor lifecycle
pub struct HealthMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthMonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}
