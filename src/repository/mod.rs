//! Persistence interfaces injected into the engine
//!
//! The engine only sees these traits. `MemoryStore` backs tests and
//! single-node deployments, `PgStore` backs production.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AssignmentKey, Granularity, HealthCheckResult, PerformanceWindow, ProxyAssignment, ServerId,
    ServerRecord, SubscriberConfig,
};

#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn upsert_server(&self, record: &ServerRecord) -> Result<()>;

    /// Returns false when no such server existed
    async fn delete_server(&self, id: ServerId) -> Result<bool>;

    async fn list_servers(&self) -> Result<Vec<ServerRecord>>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn active_assignment(&self, key: &AssignmentKey) -> Result<Option<ProxyAssignment>>;

    async fn active_for_subscriber(&self, subscriber_id: &str) -> Result<Vec<ProxyAssignment>>;

    async fn all_active(&self) -> Result<Vec<ProxyAssignment>>;

    /// Compare-and-swap the active assignment for `key`
    ///
    /// `expected` is the id of the assignment the caller believes is active
    /// (`None` for no active assignment). On mismatch nothing is written and
    /// `FleetError::ConcurrencyConflict` is returned. `next = None` ends the
    /// active assignment without a successor.
    async fn replace_assignment(
        &self,
        key: &AssignmentKey,
        expected: Option<Uuid>,
        next: Option<&ProxyAssignment>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Every assignment ever made for `key`, newest first
    async fn assignment_history(
        &self,
        key: &AssignmentKey,
        limit: usize,
    ) -> Result<Vec<ProxyAssignment>>;

    /// Active assignments whose rotation deadline is at or before `at`
    async fn expiring_before(&self, at: DateTime<Utc>) -> Result<Vec<ProxyAssignment>>;

    async fn count_active_on_server(&self, server_id: ServerId) -> Result<usize>;
}

#[async_trait]
pub trait HealthCheckRepository: Send + Sync {
    async fn record_health_check(&self, result: &HealthCheckResult) -> Result<()>;

    /// Newest first
    async fn recent_health_checks(
        &self,
        server_id: ServerId,
        limit: usize,
    ) -> Result<Vec<HealthCheckResult>>;

    async fn purge_health_checks_before(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait PerformanceRepository: Send + Sync {
    async fn store_windows(&self, windows: &[PerformanceWindow]) -> Result<()>;

    /// Closed windows starting at or after `since`, oldest first
    async fn windows(
        &self,
        server_id: ServerId,
        granularity: Granularity,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceWindow>>;

    async fn purge_windows_before(
        &self,
        granularity: Granularity,
        before: DateTime<Utc>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn save_config(&self, config: &SubscriberConfig) -> Result<()>;

    async fn load_configs(&self) -> Result<Vec<SubscriberConfig>>;
}

/// The full set of repositories the engine is built from
#[derive(Clone)]
pub struct Repositories {
    pub servers: Arc<dyn ServerRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub health_checks: Arc<dyn HealthCheckRepository>,
    pub performance: Arc<dyn PerformanceRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

impl Repositories {
    /// Use one store for every repository
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ServerRepository
            + AssignmentRepository
            + HealthCheckRepository
            + PerformanceRepository
            + PolicyRepository
            + 'static,
    {
        Self {
            servers: store.clone(),
            assignments: store.clone(),
            health_checks: store.clone(),
            performance: store.clone(),
            policies: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }
}
