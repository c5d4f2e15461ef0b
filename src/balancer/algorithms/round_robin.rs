use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{SelectionContext, ServerSelector};
use crate::models::{Algorithm, ProxyServer};

/// Cycles through the pool with one shared cursor
///
/// Uses atomic operations for lock-free index tracking.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerSelector for RoundRobinSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        if pool.is_empty() {
            return None;
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool.get(index).cloned()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, pool};
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_round_robin_cycles_in_id_order() {
        let selector = RoundRobinSelector::new();
        let servers = pool(&[1, 2, 3]);
        let scores = HashMap::new();

        let picked: Vec<_> = (0..6)
            .map(|_| selector.select(&servers, &ctx("sub", &scores)).unwrap().id)
            .collect();
        assert_eq!(picked, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_round_robin_empty_pool() {
        let selector = RoundRobinSelector::new();
        let scores = HashMap::new();
        assert!(selector.select(&[], &ctx("sub", &scores)).is_none());
    }
}
