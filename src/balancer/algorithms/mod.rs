//! Server selection algorithms
//!
//! A selector only picks from the pool it is handed. Filtering by health,
//! capacity and policy thresholds happens in the balancer before the call.

mod geographic;
mod ip_hash;
mod least_conn;
mod performance;
mod round_robin;
mod weighted;

pub use geographic::GeographicSelector;
pub use ip_hash::IpHashSelector;
pub use least_conn::LeastConnectionsSelector;
pub use performance::PerformanceSelector;
pub use round_robin::RoundRobinSelector;
pub use weighted::WeightedRoundRobinSelector;

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Algorithm, ProxyServer, ServerId};

/// Per-call inputs some algorithms need
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub subscriber_id: &'a str,
    pub preferred_region: Option<&'a str>,
    /// Current server scores, only filled for performance-based selection
    pub scores: &'a HashMap<ServerId, f64>,
}

/// Trait for server selection strategies
///
/// `pool` is never empty and is ordered by ascending server id, which is
/// what every tie-break relies on.
pub trait ServerSelector: Send + Sync {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>>;

    fn algorithm(&self) -> Algorithm;
}

/// Create a selector for the algorithm
pub fn create_selector(algorithm: Algorithm) -> Box<dyn ServerSelector> {
    match algorithm {
        Algorithm::RoundRobin => Box::new(RoundRobinSelector::new()),
        Algorithm::WeightedRoundRobin => Box::new(WeightedRoundRobinSelector::new()),
        Algorithm::LeastConnections => Box::new(LeastConnectionsSelector),
        Algorithm::IpHash => Box::new(IpHashSelector),
        Algorithm::Geographic => Box::new(GeographicSelector::new()),
        Algorithm::PerformanceBased => Box::new(PerformanceSelector),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_selector_algorithm() {
        for algorithm in Algorithm::ALL {
            assert_eq!(create_selector(algorithm).algorithm(), algorithm);
        }
    }
}
