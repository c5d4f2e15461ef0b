use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    AssignmentRepository, HealthCheckRepository, PerformanceRepository, PolicyRepository,
    ServerRepository,
};
use crate::error::{FleetError, Result};
use crate::models::{
    AssignmentKey, Granularity, HealthCheckResult, PerformanceWindow, ProxyAssignment, ServerId,
    ServerRecord, SubscriberConfig,
};

/// In-process implementation of every repository
#[derive(Default)]
pub struct MemoryStore {
    servers: DashMap<ServerId, ServerRecord>,
    assignments: Mutex<AssignmentTables>,
    health_checks: Mutex<Vec<HealthCheckResult>>,
    windows: Mutex<HashMap<(ServerId, Granularity, DateTime<Utc>), PerformanceWindow>>,
    policies: DashMap<String, SubscriberConfig>,
}

#[derive(Default)]
struct AssignmentTables {
    active: HashMap<AssignmentKey, ProxyAssignment>,
    history: Vec<ProxyAssignment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerRepository for MemoryStore {
    async fn upsert_server(&self, record: &ServerRecord) -> Result<()> {
        self.servers.insert(record.spec.id, record.clone());
        Ok(())
    }

    async fn delete_server(&self, id: ServerId) -> Result<bool> {
        Ok(self.servers.remove(&id).is_some())
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let mut servers: Vec<_> = self.servers.iter().map(|r| r.value().clone()).collect();
        servers.sort_by_key(|r| r.spec.id);
        Ok(servers)
    }
}

#[async_trait]
impl AssignmentRepository for MemoryStore {
    async fn active_assignment(&self, key: &AssignmentKey) -> Result<Option<ProxyAssignment>> {
        Ok(self.assignments.lock().active.get(key).cloned())
    }

    async fn active_for_subscriber(&self, subscriber_id: &str) -> Result<Vec<ProxyAssignment>> {
        let tables = self.assignments.lock();
        let mut found: Vec<_> = tables
            .active
            .values()
            .filter(|a| a.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.affinity_key.cmp(&b.affinity_key));
        Ok(found)
    }

    async fn all_active(&self) -> Result<Vec<ProxyAssignment>> {
        Ok(self.assignments.lock().active.values().cloned().collect())
    }

    async fn replace_assignment(
        &self,
        key: &AssignmentKey,
        expected: Option<Uuid>,
        next: Option<&ProxyAssignment>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.assignments.lock();

        let current = tables.active.get(key).map(|a| a.id);
        if current != expected {
            return Err(FleetError::ConcurrencyConflict {
                subscriber: key.to_string(),
            });
        }

        match next {
            Some(assignment) => {
                tables.active.insert(key.clone(), assignment.clone());
                tables.history.push(assignment.clone());
            }
            None => {
                tables.active.remove(key);
            }
        }
        Ok(())
    }

    async fn assignment_history(
        &self,
        key: &AssignmentKey,
        limit: usize,
    ) -> Result<Vec<ProxyAssignment>> {
        let tables = self.assignments.lock();
        Ok(tables
            .history
            .iter()
            .rev()
            .filter(|a| a.subscriber_id == key.subscriber_id && a.affinity_key == key.affinity_key)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn expiring_before(&self, at: DateTime<Utc>) -> Result<Vec<ProxyAssignment>> {
        let tables = self.assignments.lock();
        let mut expiring: Vec<_> = tables
            .active
            .values()
            .filter(|a| a.is_expired(at))
            .cloned()
            .collect();
        expiring.sort_by_key(|a| a.expires_at);
        Ok(expiring)
    }

    async fn count_active_on_server(&self, server_id: ServerId) -> Result<usize> {
        Ok(self
            .assignments
            .lock()
            .active
            .values()
            .filter(|a| a.server_id == server_id)
            .count())
    }
}

#[async_trait]
impl HealthCheckRepository for MemoryStore {
    async fn record_health_check(&self, result: &HealthCheckResult) -> Result<()> {
        self.health_checks.lock().push(result.clone());
        Ok(())
    }

    async fn recent_health_checks(
        &self,
        server_id: ServerId,
        limit: usize,
    ) -> Result<Vec<HealthCheckResult>> {
        let checks = self.health_checks.lock();
        Ok(checks
            .iter()
            .rev()
            .filter(|c| c.server_id == server_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_health_checks_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut checks = self.health_checks.lock();
        let len = checks.len();
        checks.retain(|c| c.timestamp >= before);
        Ok((len - checks.len()) as u64)
    }
}

#[async_trait]
impl PerformanceRepository for MemoryStore {
    async fn store_windows(&self, windows: &[PerformanceWindow]) -> Result<()> {
        let mut stored = self.windows.lock();
        for window in windows {
            stored.insert(
                (window.server_id, window.granularity, window.start),
                window.clone(),
            );
        }
        Ok(())
    }

    async fn windows(
        &self,
        server_id: ServerId,
        granularity: Granularity,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceWindow>> {
        let stored = self.windows.lock();
        let mut found: Vec<_> = stored
            .values()
            .filter(|w| w.server_id == server_id && w.granularity == granularity && w.start >= since)
            .cloned()
            .collect();
        found.sort_by_key(|w| w.start);
        Ok(found)
    }

    async fn purge_windows_before(
        &self,
        granularity: Granularity,
        before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut stored = self.windows.lock();
        let len = stored.len();
        stored.retain(|_, w| w.granularity != granularity || w.end > before);
        Ok((len - stored.len()) as u64)
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn save_config(&self, config: &SubscriberConfig) -> Result<()> {
        self.policies
            .insert(config.subscriber_id.clone(), config.clone());
        Ok(())
    }

    async fn load_configs(&self) -> Result<Vec<SubscriberConfig>> {
        Ok(self.policies.iter().map(|c| c.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn assignment(key: &AssignmentKey, server_id: ServerId, now: DateTime<Utc>) -> ProxyAssignment {
        ProxyAssignment {
            id: Uuid::new_v4(),
            subscriber_id: key.subscriber_id.clone(),
            affinity_key: key.affinity_key.clone(),
            server_id,
            activated_at: now,
            expires_at: Some(now + Duration::seconds(300)),
            sticky: false,
            sticky_until: None,
            client_handle: None,
        }
    }

    #[tokio::test]
    async fn test_replace_is_compare_and_swap() {
        let store = MemoryStore::new();
        let key = AssignmentKey::new("sub-1", None);
        let now = Utc::now();

        let first = assignment(&key, 1, now);
        store
            .replace_assignment(&key, None, Some(&first), now)
            .await
            .unwrap();

        // Stale expectation is rejected and leaves the active record alone
        let second = assignment(&key, 2, now);
        let err = store
            .replace_assignment(&key, None, Some(&second), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::ConcurrencyConflict { .. }));
        assert_eq!(
            store.active_assignment(&key).await.unwrap().unwrap().server_id,
            1
        );

        store
            .replace_assignment(&key, Some(first.id), Some(&second), now)
            .await
            .unwrap();
        assert_eq!(
            store.active_assignment(&key).await.unwrap().unwrap().server_id,
            2
        );

        let history = store.assignment_history(&key, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].server_id, 2);

        store
            .replace_assignment(&key, Some(second.id), None, now)
            .await
            .unwrap();
        assert!(store.active_assignment(&key).await.unwrap().is_none());
        assert_eq!(store.count_active_on_server(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expiring_before_uses_deadline() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = AssignmentKey::new("sub-a", None);
        let b = AssignmentKey::new("sub-b", Some("session".into()));

        let mut early = assignment(&a, 1, now);
        early.expires_at = Some(now + Duration::seconds(10));
        let late = assignment(&b, 1, now);
        store.replace_assignment(&a, None, Some(&early), now).await.unwrap();
        store.replace_assignment(&b, None, Some(&late), now).await.unwrap();

        let due = store
            .expiring_before(now + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].subscriber_id, "sub-a");
        assert_eq!(store.count_active_on_server(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_window_purge_respects_granularity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let window = |granularity: Granularity, start: DateTime<Utc>| PerformanceWindow {
            server_id: 1,
            granularity,
            start,
            end: start + granularity.width(),
            sample_count: 1,
            mean_latency_ms: 10.0,
            error_rate: 0.0,
            bytes_transferred: 0,
        };

        store
            .store_windows(&[
                window(Granularity::Minute, now - Duration::hours(30)),
                window(Granularity::Minute, now - Duration::minutes(5)),
                window(Granularity::Hour, now - Duration::hours(30)),
            ])
            .await
            .unwrap();

        let purged = store
            .purge_windows_before(Granularity::Minute, now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(
            store
                .windows(1, Granularity::Hour, now - Duration::days(2))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
