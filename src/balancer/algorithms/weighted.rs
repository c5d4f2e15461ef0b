use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{SelectionContext, ServerSelector};
use crate::models::{Algorithm, ProxyServer, ServerId};

/// Smooth weighted round robin with weight `1 / (load + 1)`
///
/// Lightly loaded servers come up more often but every server in the pool
/// is eventually picked.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinSelector {
    current: Mutex<HashMap<ServerId, f64>>,
}

impl WeightedRoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn weight(server: &ProxyServer) -> f64 {
        1.0 / (server.current_load() as f64 + 1.0)
    }
}

impl ServerSelector for WeightedRoundRobinSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        let mut current = self.current.lock();
        current.retain(|id, _| pool.iter().any(|s| s.id == *id));

        let mut total = 0.0;
        let mut best: Option<(&Arc<ProxyServer>, f64)> = None;
        for server in pool {
            let weight = Self::weight(server);
            total += weight;
            let value = current.entry(server.id).or_insert(0.0);
            *value += weight;
            if best.map(|(_, top)| *value > top).unwrap_or(true) {
                best = Some((server, *value));
            }
        }

        let (chosen, _) = best?;
        if let Some(value) = current.get_mut(&chosen.id) {
            *value -= total;
        }
        Some(chosen.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::WeightedRoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, pool};
    use super::*;

    #[test]
    fn test_equal_load_alternates() {
        let selector = WeightedRoundRobinSelector::new();
        let servers = pool(&[1, 2]);
        let scores = HashMap::new();

        let picked: Vec<_> = (0..4)
            .map(|_| selector.select(&servers, &ctx("sub", &scores)).unwrap().id)
            .collect();
        assert_eq!(picked, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_lighter_server_is_favored() {
        let selector = WeightedRoundRobinSelector::new();
        let servers = pool(&[1, 2]);
        let scores = HashMap::new();
        for _ in 0..3 {
            servers[0].try_acquire();
        }

        let mut counts = HashMap::new();
        for _ in 0..50 {
            let id = selector.select(&servers, &ctx("sub", &scores)).unwrap().id;
            *counts.entry(id).or_insert(0) += 1;
        }
        // weights 0.25 vs 1.0
        assert_eq!(counts[&1], 10);
        assert_eq!(counts[&2], 40);
    }
}
