use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{SelectionContext, ServerSelector};
use crate::models::{Algorithm, ProxyServer};

/// Round robin over servers in the preferred region
///
/// Falls back to the whole pool when no server in the region is eligible.
#[derive(Debug, Default)]
pub struct GeographicSelector {
    cursors: Mutex<HashMap<String, usize>>,
}

impl GeographicSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerSelector for GeographicSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        let region = ctx.preferred_region.unwrap_or_default();
        let local: Vec<_> = pool
            .iter()
            .filter(|s| {
                s.region
                    .as_deref()
                    .map(|r| r.eq_ignore_ascii_case(region))
                    .unwrap_or(false)
            })
            .collect();

        let (candidates, key): (Vec<&Arc<ProxyServer>>, String) = if local.is_empty() {
            (pool.iter().collect(), String::new())
        } else {
            (local, region.to_lowercase())
        };
        if candidates.is_empty() {
            return None;
        }

        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(key).or_insert(0);
        let index = *cursor % candidates.len();
        *cursor = cursor.wrapping_add(1);
        candidates.get(index).map(|s| (*s).clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Geographic
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::pool;
    use super::*;
    use crate::models::server::test_spec;
    use crate::models::ServerId;

    fn regional(id: ServerId, region: &str) -> Arc<ProxyServer> {
        let mut spec = test_spec(id);
        spec.region = Some(region.to_string());
        Arc::new(ProxyServer::new(spec))
    }

    #[test]
    fn test_prefers_region_case_insensitively() {
        let selector = GeographicSelector::new();
        let servers = vec![regional(1, "us-east"), regional(2, "EU-West"), regional(3, "eu-west")];
        let scores = HashMap::new();
        let ctx = SelectionContext {
            subscriber_id: "sub",
            preferred_region: Some("eu-west"),
            scores: &scores,
        };

        let picked: Vec<_> = (0..4)
            .map(|_| selector.select(&servers, &ctx).unwrap().id)
            .collect();
        assert_eq!(picked, vec![2, 3, 2, 3]);
    }

    #[test]
    fn test_falls_back_to_whole_pool() {
        let selector = GeographicSelector::new();
        let servers = pool(&[4, 5]);
        let scores = HashMap::new();
        let ctx = SelectionContext {
            subscriber_id: "sub",
            preferred_region: Some("ap-south"),
            scores: &scores,
        };

        assert_eq!(selector.select(&servers, &ctx).unwrap().id, 4);
        assert_eq!(selector.select(&servers, &ctx).unwrap().id, 5);
    }
}
