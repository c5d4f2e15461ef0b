use std::sync::Arc;

use super::{SelectionContext, ServerSelector};
use crate::analytics::NEUTRAL_SCORE;
use crate::models::{Algorithm, ProxyServer};

/// Picks the highest-scoring server, lowest id on ties
#[derive(Debug, Default, Clone, Copy)]
pub struct PerformanceSelector;

impl ServerSelector for PerformanceSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        let mut best: Option<(&Arc<ProxyServer>, f64)> = None;
        for server in pool {
            let score = ctx.scores.get(&server.id).copied().unwrap_or(NEUTRAL_SCORE);
            // Strict comparison keeps the earlier (lower id) server on ties
            if best.map(|(_, top)| score > top).unwrap_or(true) {
                best = Some((server, score));
            }
        }
        best.map(|(server, _)| server.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::PerformanceBased
    }
}
