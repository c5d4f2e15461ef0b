use sqlx::{Executor, PgPool};
use tracing::info;

use crate::error::Result;

/// Apply every pending migration in version order
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if is_migration_applied(pool, version).await? {
            continue;
        }

        info!(version = version, name = name, "Applying migration");

        // Multi-statement scripts go through the simple query protocol
        pool.execute(sql).await?;
        record_migration(pool, version, name).await?;

        info!(version = version, name = name, "Migration applied successfully");
    }

    Ok(())
}

async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "servers", MIGRATION_001_SERVERS),
        (2, "proxy_assignments", MIGRATION_002_ASSIGNMENTS),
        (3, "health_checks", MIGRATION_003_HEALTH_CHECKS),
        (4, "performance_windows", MIGRATION_004_PERFORMANCE_WINDOWS),
        (5, "subscriber_policies", MIGRATION_005_SUBSCRIBER_POLICIES),
    ]
}

const MIGRATION_001_SERVERS: &str = r#"
CREATE TABLE IF NOT EXISTS servers (
    id BIGINT PRIMARY KEY,
    vendor VARCHAR(64) NOT NULL,
    panel_url TEXT NOT NULL,
    region VARCHAR(64),
    capacity INTEGER NOT NULL CHECK (capacity > 0),
    status VARCHAR(16) NOT NULL DEFAULT 'unknown',
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    consecutive_successes INTEGER NOT NULL DEFAULT 0,
    last_probe_at TIMESTAMPTZ,
    last_healthy_at TIMESTAMPTZ,
    current_load INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_servers_status ON servers(status);
CREATE INDEX IF NOT EXISTS idx_servers_region ON servers(region);
"#;

// Superseded rows keep ended_at set and form the audit trail
const MIGRATION_002_ASSIGNMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_assignments (
    id UUID PRIMARY KEY,
    subscriber_id VARCHAR(255) NOT NULL,
    affinity_key VARCHAR(255) NOT NULL DEFAULT '',
    server_id BIGINT NOT NULL REFERENCES servers(id),
    activated_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ,
    sticky BOOLEAN NOT NULL DEFAULT false,
    sticky_until TIMESTAMPTZ,
    client_handle TEXT,
    ended_at TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_one_active
    ON proxy_assignments(subscriber_id, affinity_key)
    WHERE ended_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_assignments_expiry
    ON proxy_assignments(expires_at)
    WHERE ended_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_assignments_server
    ON proxy_assignments(server_id)
    WHERE ended_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_assignments_history
    ON proxy_assignments(subscriber_id, affinity_key, activated_at DESC);
"#;

const MIGRATION_003_HEALTH_CHECKS: &str = r#"
CREATE TABLE IF NOT EXISTS health_checks (
    id BIGSERIAL,
    server_id BIGINT NOT NULL,
    checked_at TIMESTAMPTZ NOT NULL,
    latency_ms BIGINT NOT NULL,
    success BOOLEAN NOT NULL,
    error_class VARCHAR(32) NOT NULL DEFAULT 'none',
    PRIMARY KEY (id, checked_at)
);

CREATE INDEX IF NOT EXISTS idx_health_checks_server_time
    ON health_checks(server_id, checked_at DESC);
CREATE INDEX IF NOT EXISTS idx_health_checks_time ON health_checks(checked_at);
"#;

const MIGRATION_004_PERFORMANCE_WINDOWS: &str = r#"
CREATE TABLE IF NOT EXISTS performance_windows (
    server_id BIGINT NOT NULL,
    granularity VARCHAR(8) NOT NULL,
    window_start TIMESTAMPTZ NOT NULL,
    window_end TIMESTAMPTZ NOT NULL,
    sample_count BIGINT NOT NULL,
    mean_latency_ms DOUBLE PRECISION NOT NULL,
    error_rate DOUBLE PRECISION NOT NULL,
    bytes_transferred BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (server_id, granularity, window_start)
);

CREATE INDEX IF NOT EXISTS idx_performance_windows_end
    ON performance_windows(granularity, window_end);
"#;

const MIGRATION_005_SUBSCRIBER_POLICIES: &str = r#"
CREATE TABLE IF NOT EXISTS subscriber_policies (
    subscriber_id VARCHAR(255) PRIMARY KEY,
    config JSONB NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;
