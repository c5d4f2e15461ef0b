use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FleetError, Result};
use crate::models::{ProxyServer, ServerId, ServerStatus};

/// Every managed server, addressed by id and shared by reference
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: DashMap<ServerId, Arc<ProxyServer>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server; ids are unique
    pub fn insert(&self, server: ProxyServer) -> Result<Arc<ProxyServer>> {
        let id = server.id;
        match self.servers.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(FleetError::Configuration(
                format!("server {} is already registered", id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let server = Arc::new(server);
                slot.insert(server.clone());
                Ok(server)
            }
        }
    }

    pub fn get(&self, id: ServerId) -> Option<Arc<ProxyServer>> {
        self.servers.get(&id).map(|s| s.value().clone())
    }

    pub fn remove(&self, id: ServerId) -> Option<Arc<ProxyServer>> {
        self.servers.remove(&id).map(|(_, server)| server)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// All servers ordered by ascending id
    pub fn all(&self) -> Vec<Arc<ProxyServer>> {
        let mut servers: Vec<_> = self.servers.iter().map(|s| s.value().clone()).collect();
        servers.sort_by_key(|s| s.id);
        servers
    }

    /// Servers the health monitor should probe (everything except Offline)
    pub fn active(&self) -> Vec<Arc<ProxyServer>> {
        self.all()
            .into_iter()
            .filter(|s| s.status() != ServerStatus::Offline)
            .collect()
    }

    /// Number of Healthy or Degraded servers
    pub fn serving_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.value().status().is_serving())
            .count()
    }

    pub fn status_counts(&self) -> HashMap<ServerStatus, usize> {
        let mut counts = HashMap::new();
        for server in self.servers.iter() {
            *counts.entry(server.value().status()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::test_spec;
    use crate::models::HealthState;

    fn set_status(server: &ProxyServer, status: ServerStatus) {
        server.update_health(|h| HealthState {
            status,
            ..h.clone()
        });
    }

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let registry = ServerRegistry::new();
        registry.insert(ProxyServer::new(test_spec(1))).unwrap();

        let err = registry.insert(ProxyServer::new(test_spec(1))).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_all_is_sorted_and_active_skips_offline() {
        let registry = ServerRegistry::new();
        for id in [3, 1, 2] {
            registry.insert(ProxyServer::new(test_spec(id))).unwrap();
        }

        let ids: Vec<_> = registry.all().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        set_status(&registry.get(2).unwrap(), ServerStatus::Offline);
        let ids: Vec<_> = registry.active().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_status_counts_and_serving() {
        let registry = ServerRegistry::new();
        for id in 1..=4 {
            registry.insert(ProxyServer::new(test_spec(id))).unwrap();
        }
        set_status(&registry.get(1).unwrap(), ServerStatus::Healthy);
        set_status(&registry.get(2).unwrap(), ServerStatus::Degraded);
        set_status(&registry.get(3).unwrap(), ServerStatus::Unhealthy);

        assert_eq!(registry.serving_count(), 2);
        let counts = registry.status_counts();
        assert_eq!(counts[&ServerStatus::Healthy], 1);
        assert_eq!(counts[&ServerStatus::Unknown], 1);
        assert!(registry.remove(4).is_some());
        assert!(registry.get(4).is_none());
    }
}
