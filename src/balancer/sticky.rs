use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::{AssignmentKey, ProxyAssignment, ServerId};

/// Sticky assignments still inside their window, keyed by (subscriber, affinity key)
#[derive(Debug, Default)]
pub struct StickyTable {
    entries: DashMap<AssignmentKey, ProxyAssignment>,
}

impl StickyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live sticky assignment for `key`; expired entries are dropped on read
    pub fn get(&self, key: &AssignmentKey, now: DateTime<Utc>) -> Option<ProxyAssignment> {
        let hit = self.entries.get(key).map(|e| e.value().clone())?;
        if hit.holds_sticky(now) {
            Some(hit)
        } else {
            self.entries.remove(key);
            None
        }
    }

    pub fn insert(&self, assignment: ProxyAssignment) {
        self.entries.insert(assignment.key(), assignment);
    }

    pub fn remove(&self, key: &AssignmentKey) -> Option<ProxyAssignment> {
        self.entries.remove(key).map(|(_, a)| a)
    }

    /// Forget every entry pinned to `server_id`
    pub fn purge_server(&self, server_id: ServerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, a| a.server_id != server_id);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear_subscriber(&self, subscriber_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.subscriber_id != subscriber_id);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
