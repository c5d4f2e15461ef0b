use std::sync::Arc;

use super::{SelectionContext, ServerSelector};
use crate::models::{Algorithm, ProxyServer};

/// Picks the server with the fewest active assignments, lowest id on ties
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastConnectionsSelector;

impl ServerSelector for LeastConnectionsSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        pool.iter()
            .min_by_key(|s| (s.current_load(), s.id))
            .cloned()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeastConnections
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, pool};
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_least_connections_prefers_idle_then_lowest_id() {
        let servers = pool(&[1, 2, 3]);
        let scores = HashMap::new();
        servers[0].try_acquire();
        servers[0].try_acquire();
        servers[1].try_acquire();

        let picked = LeastConnectionsSelector.select(&servers, &ctx("sub", &scores));
        assert_eq!(picked.unwrap().id, 3);

        servers[2].try_acquire();
        let picked = LeastConnectionsSelector.select(&servers, &ctx("sub", &scores));
        assert_eq!(picked.unwrap().id, 2);
    }
}
