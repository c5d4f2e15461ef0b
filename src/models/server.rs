use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

/// Server identifier
pub type ServerId = i64;

/// Health status of a proxy server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Unknown => "unknown",
            ServerStatus::Healthy => "healthy",
            ServerStatus::Degraded => "degraded",
            ServerStatus::Unhealthy => "unhealthy",
            ServerStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(ServerStatus::Unknown),
            "healthy" => Some(ServerStatus::Healthy),
            "degraded" => Some(ServerStatus::Degraded),
            "unhealthy" => Some(ServerStatus::Unhealthy),
            "offline" => Some(ServerStatus::Offline),
            _ => None,
        }
    }

    /// Healthy or Degraded: counts toward the rotation pool
    pub fn is_serving(&self) -> bool {
        matches!(self, ServerStatus::Healthy | ServerStatus::Degraded)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vendor control panel fronting a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelEndpoint {
    /// Vendor tag, selects the gateway implementation
    pub vendor: String,
    pub url: Url,
}

/// Mutable health bookkeeping, written only by the health monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: ServerStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_healthy_at: Option<DateTime<Utc>>,
}

/// Registration input for a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: ServerId,
    pub panel: PanelEndpoint,
    #[serde(default)]
    pub region: Option<String>,
    /// Maximum concurrent assignments
    pub capacity: u32,
}

/// Persisted view of a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(flatten)]
    pub spec: ServerSpec,
    pub health: HealthState,
    pub current_load: u32,
}

/// Set in the load counter while a server is being decommissioned
const DRAINING: u32 = 1 << 31;

/// A managed proxy node
///
/// Shared by reference through the registry. The load counter is only ever
/// touched with atomic operations; its high bit marks a draining server.
#[derive(Debug)]
pub struct ProxyServer {
    pub id: ServerId,
    pub panel: PanelEndpoint,
    pub region: Option<String>,
    pub capacity: u32,
    load: AtomicU32,
    health: RwLock<HealthState>,
}

impl ProxyServer {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            id: spec.id,
            panel: spec.panel,
            region: spec.region,
            capacity: spec.capacity,
            load: AtomicU32::new(0),
            health: RwLock::new(HealthState::default()),
        }
    }

    /// Rebuild from a persisted record
    pub fn from_record(record: ServerRecord) -> Self {
        let server = Self::new(record.spec);
        server.load.store(record.current_load, Ordering::Relaxed);
        *server.health.write() = record.health;
        server
    }

    pub fn spec(&self) -> ServerSpec {
        ServerSpec {
            id: self.id,
            panel: self.panel.clone(),
            region: self.region.clone(),
            capacity: self.capacity,
        }
    }

    pub fn record(&self) -> ServerRecord {
        ServerRecord {
            spec: self.spec(),
            health: self.health(),
            current_load: self.current_load(),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.health.read().status
    }

    pub fn health(&self) -> HealthState {
        self.health.read().clone()
    }

    /// Apply a health update under the write lock, returning the previous state
    pub fn update_health<F>(&self, f: F) -> (HealthState, HealthState)
    where
        F: FnOnce(&HealthState) -> HealthState,
    {
        let mut guard = self.health.write();
        let previous = guard.clone();
        *guard = f(&previous);
        (previous, guard.clone())
    }

    pub fn current_load(&self) -> u32 {
        self.load.load(Ordering::Acquire) & !DRAINING
    }

    pub fn is_draining(&self) -> bool {
        self.load.load(Ordering::Acquire) & DRAINING != 0
    }

    pub fn has_capacity(&self) -> bool {
        !self.is_draining() && self.current_load() < self.capacity
    }

    /// Atomically take one slot if below capacity and not draining
    pub fn try_acquire(&self) -> bool {
        let capacity = self.capacity.min(DRAINING - 1);
        self.load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load & DRAINING == 0 && load < capacity).then_some(load + 1)
            })
            .is_ok()
    }

    /// Stop handing out slots, only if none are held
    ///
    /// Returns the held count on refusal.
    pub fn begin_drain(&self) -> std::result::Result<(), u32> {
        self.load
            .compare_exchange(0, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|load| load & !DRAINING)
    }

    /// Put a drained server back into service
    pub fn end_drain(&self) {
        self.load.fetch_and(!DRAINING, Ordering::AcqRel);
    }

    /// Overwrite the load counter after recounting active assignments
    pub(crate) fn set_load(&self, load: u32) {
        self.load.store(load & !DRAINING, Ordering::Release);
    }

    /// Atomically give back one slot, never going below zero
    pub fn release(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load & !DRAINING != 0).then(|| load - 1)
            });
    }
}

#[cfg(test)]
pub(crate) fn test_spec(id: ServerId) -> ServerSpec {
    ServerSpec {
        id,
        panel: PanelEndpoint {
            vendor: "test".to_string(),
            url: Url::parse(&format!("https://panel-{}.example:2053", id)).unwrap(),
        },
        region: None,
        capacity: 100,
    }
}
