//! Retention service
//!
//! Purges raw health checks and closed performance windows once they fall
//! out of their retention period.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::Granularity;
use crate::repository::{HealthCheckRepository, PerformanceRepository};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub health_checks: u64,
    pub windows: u64,
}

/// Retention service
pub struct RetentionService {
    checks: Arc<dyn HealthCheckRepository>,
    windows: Arc<dyn PerformanceRepository>,
    clock: Arc<dyn Clock>,
    /// How long raw health checks are kept
    health_check_retention: Duration,
    check_interval: Duration,
}

impl RetentionService {
    pub fn new(
        checks: Arc<dyn HealthCheckRepository>,
        windows: Arc<dyn PerformanceRepository>,
        clock: Arc<dyn Clock>,
        health_check_retention: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            checks,
            windows,
            clock,
            health_check_retention,
            check_interval,
        }
    }

    /// Run the retention service
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting retention service (health checks kept {} days)",
            self.health_check_retention.as_secs() / 86_400
        );

        let mut ticker = interval(self.check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!("Retention cleanup failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Retention service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Delete everything older than its retention period
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<RetentionReport> {
        let now = self.clock.now();
        let retention = chrono::Duration::from_std(self.health_check_retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));

        let mut report = RetentionReport {
            health_checks: self.checks.purge_health_checks_before(now - retention).await?,
            windows: 0,
        };
        for granularity in Granularity::ALL {
            report.windows += self
                .windows
                .purge_windows_before(granularity, now - granularity.retention())
                .await?;
        }

        if report.health_checks > 0 || report.windows > 0 {
            info!(
                health_checks = report.health_checks,
                windows = report.windows,
                "Purged expired telemetry"
            );
        } else {
            debug!("Nothing to purge");
        }
        Ok(report)
    }
}

/// Handle for managing the retention service
pub struct RetentionHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RetentionHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RetentionHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{ErrorClass, HealthCheckResult, PerformanceWindow};
    use crate::repository::MemoryStore;
    use chrono::Utc;

    fn window(granularity: Granularity, start: chrono::DateTime<Utc>) -> PerformanceWindow {
        PerformanceWindow {
            server_id: 1,
            granularity,
            start,
            end: start + granularity.width(),
            sample_count: 1,
            mean_latency_ms: 10.0,
            error_rate: 0.0,
            bytes_transferred: 0,
        }
    }

    #[tokio::test]
    async fn test_cleanup_respects_each_retention() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));

        for days in [1, 8] {
            store
                .record_health_check(&HealthCheckResult {
                    server_id: 1,
                    timestamp: now - chrono::Duration::days(days),
                    latency_ms: 5,
                    success: true,
                    error_class: ErrorClass::None,
                })
                .await
                .unwrap();
        }
        store
            .store_windows(&[
                window(Granularity::Minute, now - chrono::Duration::hours(25)),
                window(Granularity::Minute, now - chrono::Duration::hours(1)),
                window(Granularity::Hour, now - chrono::Duration::days(10)),
                window(Granularity::Day, now - chrono::Duration::days(400)),
            ])
            .await
            .unwrap();

        let service = RetentionService::new(
            store.clone(),
            store.clone(),
            clock,
            Duration::from_secs(7 * 86_400),
            Duration::from_secs(3600),
        );
        let report = service.cleanup().await.unwrap();
        assert_eq!(report, RetentionReport { health_checks: 1, windows: 2 });

        let again = service.cleanup().await.unwrap();
        assert_eq!(again, RetentionReport::default());
    }
}
