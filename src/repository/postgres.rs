use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::{
    AssignmentRepository, HealthCheckRepository, PerformanceRepository, PolicyRepository,
    ServerRepository,
};
use crate::error::{FleetError, Result};
use crate::models::{
    AssignmentKey, ErrorClass, Granularity, HealthCheckResult, HealthState, PanelEndpoint,
    PerformanceWindow, ProxyAssignment, ServerId, ServerRecord, ServerSpec, ServerStatus,
    SubscriberConfig,
};

/// Postgres implementation of every repository
///
/// A missing affinity key is stored as the empty string so the partial
/// unique index on active assignments covers it.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ServerRow {
    id: i64,
    vendor: String,
    panel_url: String,
    region: Option<String>,
    capacity: i32,
    status: String,
    consecutive_failures: i32,
    consecutive_successes: i32,
    last_probe_at: Option<DateTime<Utc>>,
    last_healthy_at: Option<DateTime<Utc>>,
    current_load: i32,
}

impl TryFrom<ServerRow> for ServerRecord {
    type Error = FleetError;

    fn try_from(row: ServerRow) -> Result<Self> {
        Ok(ServerRecord {
            spec: ServerSpec {
                id: row.id,
                panel: PanelEndpoint {
                    vendor: row.vendor,
                    url: Url::parse(&row.panel_url)?,
                },
                region: row.region,
                capacity: row.capacity.max(0) as u32,
            },
            health: HealthState {
                status: ServerStatus::from_str(&row.status).unwrap_or_default(),
                consecutive_failures: row.consecutive_failures.max(0) as u32,
                consecutive_successes: row.consecutive_successes.max(0) as u32,
                last_probe_at: row.last_probe_at,
                last_healthy_at: row.last_healthy_at,
            },
            current_load: row.current_load.max(0) as u32,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    id: Uuid,
    subscriber_id: String,
    affinity_key: String,
    server_id: i64,
    activated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    sticky: bool,
    sticky_until: Option<DateTime<Utc>>,
    client_handle: Option<String>,
}

impl From<AssignmentRow> for ProxyAssignment {
    fn from(row: AssignmentRow) -> Self {
        ProxyAssignment {
            id: row.id,
            subscriber_id: row.subscriber_id,
            affinity_key: (!row.affinity_key.is_empty()).then_some(row.affinity_key),
            server_id: row.server_id,
            activated_at: row.activated_at,
            expires_at: row.expires_at,
            sticky: row.sticky,
            sticky_until: row.sticky_until,
            client_handle: row.client_handle,
        }
    }
}

#[derive(FromRow)]
struct HealthCheckRow {
    server_id: i64,
    checked_at: DateTime<Utc>,
    latency_ms: i64,
    success: bool,
    error_class: String,
}

impl From<HealthCheckRow> for HealthCheckResult {
    fn from(row: HealthCheckRow) -> Self {
        HealthCheckResult {
            server_id: row.server_id,
            timestamp: row.checked_at,
            latency_ms: row.latency_ms.max(0) as u64,
            success: row.success,
            error_class: ErrorClass::from_str(&row.error_class).unwrap_or_default(),
        }
    }
}

#[derive(FromRow)]
struct WindowRow {
    server_id: i64,
    granularity: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    sample_count: i64,
    mean_latency_ms: f64,
    error_rate: f64,
    bytes_transferred: i64,
}

impl TryFrom<WindowRow> for PerformanceWindow {
    type Error = FleetError;

    fn try_from(row: WindowRow) -> Result<Self> {
        let granularity = Granularity::from_str(&row.granularity).ok_or_else(|| {
            FleetError::Internal(format!("unknown window granularity '{}'", row.granularity))
        })?;
        Ok(PerformanceWindow {
            server_id: row.server_id,
            granularity,
            start: row.window_start,
            end: row.window_end,
            sample_count: row.sample_count.max(0) as u64,
            mean_latency_ms: row.mean_latency_ms,
            error_rate: row.error_rate,
            bytes_transferred: row.bytes_transferred.max(0) as u64,
        })
    }
}

const ASSIGNMENT_COLUMNS: &str = "id, subscriber_id, affinity_key, server_id, activated_at, \
     expires_at, sticky, sticky_until, client_handle";

fn affinity_column(key: &AssignmentKey) -> &str {
    key.affinity_key.as_deref().unwrap_or("")
}

#[async_trait]
impl ServerRepository for PgStore {
    async fn upsert_server(&self, record: &ServerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO servers (id, vendor, panel_url, region, capacity, status,
                                 consecutive_failures, consecutive_successes,
                                 last_probe_at, last_healthy_at, current_load, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (id) DO UPDATE SET
                vendor = EXCLUDED.vendor,
                panel_url = EXCLUDED.panel_url,
                region = EXCLUDED.region,
                capacity = EXCLUDED.capacity,
                status = EXCLUDED.status,
                consecutive_failures = EXCLUDED.consecutive_failures,
                consecutive_successes = EXCLUDED.consecutive_successes,
                last_probe_at = EXCLUDED.last_probe_at,
                last_healthy_at = EXCLUDED.last_healthy_at,
                current_load = EXCLUDED.current_load,
                updated_at = NOW()
            "#,
        )
        .bind(record.spec.id)
        .bind(&record.spec.panel.vendor)
        .bind(record.spec.panel.url.as_str())
        .bind(&record.spec.region)
        .bind(record.spec.capacity as i32)
        .bind(record.health.status.as_str())
        .bind(record.health.consecutive_failures as i32)
        .bind(record.health.consecutive_successes as i32)
        .bind(record.health.last_probe_at)
        .bind(record.health.last_healthy_at)
        .bind(record.current_load as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_server(&self, id: ServerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!(server_id = id, "Deleted server");
        }
        Ok(result.rows_affected() > 0)
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let rows = sqlx::query_as::<_, ServerRow>(
            r#"
            SELECT id, vendor, panel_url, region, capacity, status,
                   consecutive_failures, consecutive_successes,
                   last_probe_at, last_healthy_at, current_load
            FROM servers
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ServerRecord::try_from).collect()
    }
}

#[async_trait]
impl AssignmentRepository for PgStore {
    async fn active_assignment(&self, key: &AssignmentKey) -> Result<Option<ProxyAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM proxy_assignments \
             WHERE subscriber_id = $1 AND affinity_key = $2 AND ended_at IS NULL",
            ASSIGNMENT_COLUMNS
        ))
        .bind(&key.subscriber_id)
        .bind(affinity_column(key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProxyAssignment::from))
    }

    async fn active_for_subscriber(&self, subscriber_id: &str) -> Result<Vec<ProxyAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM proxy_assignments \
             WHERE subscriber_id = $1 AND ended_at IS NULL ORDER BY affinity_key",
            ASSIGNMENT_COLUMNS
        ))
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProxyAssignment::from).collect())
    }

    async fn all_active(&self) -> Result<Vec<ProxyAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM proxy_assignments WHERE ended_at IS NULL",
            ASSIGNMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProxyAssignment::from).collect())
    }

    async fn replace_assignment(
        &self,
        key: &AssignmentKey,
        expected: Option<Uuid>,
        next: Option<&ProxyAssignment>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conflict = || FleetError::ConcurrencyConflict {
            subscriber: key.to_string(),
        };

        let mut tx = self.pool.begin().await?;

        let current: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM proxy_assignments
            WHERE subscriber_id = $1 AND affinity_key = $2 AND ended_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(&key.subscriber_id)
        .bind(affinity_column(key))
        .fetch_optional(&mut *tx)
        .await?;

        if current != expected {
            debug!(key = %key, "Active assignment changed underneath caller");
            return Err(conflict());
        }

        if let Some(id) = current {
            sqlx::query("UPDATE proxy_assignments SET ended_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(a) = next {
            let inserted = sqlx::query(
                r#"
                INSERT INTO proxy_assignments
                    (id, subscriber_id, affinity_key, server_id, activated_at,
                     expires_at, sticky, sticky_until, client_handle)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(a.id)
            .bind(&a.subscriber_id)
            .bind(a.affinity_key.as_deref().unwrap_or(""))
            .bind(a.server_id)
            .bind(a.activated_at)
            .bind(a.expires_at)
            .bind(a.sticky)
            .bind(a.sticky_until)
            .bind(&a.client_handle)
            .execute(&mut *tx)
            .await;

            // A concurrent writer won the partial unique index
            if let Err(sqlx::Error::Database(db)) = &inserted {
                if db.is_unique_violation() {
                    return Err(conflict());
                }
            }
            inserted?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn assignment_history(
        &self,
        key: &AssignmentKey,
        limit: usize,
    ) -> Result<Vec<ProxyAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM proxy_assignments \
             WHERE subscriber_id = $1 AND affinity_key = $2 \
             ORDER BY activated_at DESC LIMIT $3",
            ASSIGNMENT_COLUMNS
        ))
        .bind(&key.subscriber_id)
        .bind(affinity_column(key))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProxyAssignment::from).collect())
    }

    async fn expiring_before(&self, at: DateTime<Utc>) -> Result<Vec<ProxyAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM proxy_assignments \
             WHERE ended_at IS NULL AND expires_at <= $1 ORDER BY expires_at",
            ASSIGNMENT_COLUMNS
        ))
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProxyAssignment::from).collect())
    }

    async fn count_active_on_server(&self, server_id: ServerId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM proxy_assignments WHERE server_id = $1 AND ended_at IS NULL",
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl HealthCheckRepository for PgStore {
    async fn record_health_check(&self, result: &HealthCheckResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO health_checks (server_id, checked_at, latency_ms, success, error_class)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(result.server_id)
        .bind(result.timestamp)
        .bind(result.latency_ms as i64)
        .bind(result.success)
        .bind(result.error_class.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_health_checks(
        &self,
        server_id: ServerId,
        limit: usize,
    ) -> Result<Vec<HealthCheckResult>> {
        let rows = sqlx::query_as::<_, HealthCheckRow>(
            r#"
            SELECT server_id, checked_at, latency_ms, success, error_class
            FROM health_checks
            WHERE server_id = $1
            ORDER BY checked_at DESC
            LIMIT $2
            "#,
        )
        .bind(server_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HealthCheckResult::from).collect())
    }

    async fn purge_health_checks_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM health_checks WHERE checked_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PerformanceRepository for PgStore {
    async fn store_windows(&self, windows: &[PerformanceWindow]) -> Result<()> {
        if windows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for w in windows {
            sqlx::query(
                r#"
                INSERT INTO performance_windows
                    (server_id, granularity, window_start, window_end, sample_count,
                     mean_latency_ms, error_rate, bytes_transferred)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (server_id, granularity, window_start) DO NOTHING
                "#,
            )
            .bind(w.server_id)
            .bind(w.granularity.as_str())
            .bind(w.start)
            .bind(w.end)
            .bind(w.sample_count as i64)
            .bind(w.mean_latency_ms)
            .bind(w.error_rate)
            .bind(w.bytes_transferred as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn windows(
        &self,
        server_id: ServerId,
        granularity: Granularity,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceWindow>> {
        let rows = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT server_id, granularity, window_start, window_end, sample_count,
                   mean_latency_ms, error_rate, bytes_transferred
            FROM performance_windows
            WHERE server_id = $1 AND granularity = $2 AND window_start >= $3
            ORDER BY window_start
            "#,
        )
        .bind(server_id)
        .bind(granularity.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PerformanceWindow::try_from).collect()
    }

    async fn purge_windows_before(
        &self,
        granularity: Granularity,
        before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM performance_windows WHERE granularity = $1 AND window_end <= $2",
        )
        .bind(granularity.as_str())
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PolicyRepository for PgStore {
    async fn save_config(&self, config: &SubscriberConfig) -> Result<()> {
        let blob = serde_json::to_value(config)
            .map_err(|e| FleetError::Internal(format!("failed to encode policy: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO subscriber_policies (subscriber_id, config, version, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (subscriber_id) DO UPDATE SET
                config = EXCLUDED.config,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(&config.subscriber_id)
        .bind(blob)
        .bind(config.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_configs(&self) -> Result<Vec<SubscriberConfig>> {
        let blobs: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT config FROM subscriber_policies ORDER BY subscriber_id")
                .fetch_all(&self.pool)
                .await?;

        blobs
            .into_iter()
            .map(|blob| {
                serde_json::from_value(blob).map_err(|e| {
                    FleetError::Internal(format!("stored policy failed to decode: {}", e))
                })
            })
            .collect()
    }
}
