use std::sync::Arc;

use super::{SelectionContext, ServerSelector};
use crate::models::{Algorithm, ProxyServer};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, stable across processes and releases
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps a subscriber to the same server while the pool is unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IpHashSelector;

impl ServerSelector for IpHashSelector {
    fn select(
        &self,
        pool: &[Arc<ProxyServer>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ProxyServer>> {
        if pool.is_empty() {
            return None;
        }
        let index = (fnv1a(ctx.subscriber_id.as_bytes()) % pool.len() as u64) as usize;
        pool.get(index).cloned()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::IpHash
    }
}
