use std::sync::Arc;

use crate::config::Config;
use crate::dht::Ring;
use crate::dht::Vnode;
use crate::error::Result;
use crate::transport::Transport;

mod test_lookup;
mod test_ring;
mod test_stabilization;
mod test_transport;

/// Timers far enough out that only manual rounds run during a test.
const MANUAL_STABILIZE_MS: u64 = 3600 * 1000;

pub fn test_config(host: &str, num_vnodes: usize, num_successors: usize) -> Config {
    let mut config = Config::new(host);
    config.num_vnodes = num_vnodes;
    config.num_successors = num_successors;
    config.stabilize_min_ms = MANUAL_STABILIZE_MS;
    config.stabilize_max_ms = MANUAL_STABILIZE_MS;
    config.rng_seed = Some(7);
    config
}

pub async fn create_ring(
    transport: &Arc<dyn Transport>,
    host: &str,
    num_vnodes: usize,
    num_successors: usize,
) -> Ring {
    Ring::create(
        test_config(host, num_vnodes, num_successors),
        transport.clone(),
    )
    .await
    .unwrap()
}

pub async fn join_ring(
    transport: &Arc<dyn Transport>,
    host: &str,
    existing: &str,
    num_vnodes: usize,
    num_successors: usize,
) -> Ring {
    Ring::join(
        test_config(host, num_vnodes, num_successors),
        transport.clone(),
        existing,
    )
    .await
    .unwrap()
}

/// Every vnode of the given rings, sorted by id.
pub fn ring_order(rings: &[&Ring]) -> Vec<Vnode> {
    let mut all: Vec<Vnode> = rings.iter().flat_map(|r| r.local_vnodes()).collect();
    all.sort_by(|a, b| a.id.cmp(&b.id));
    all
}

/// True when every successor list and predecessor matches the sorted ring order.
pub fn converged(rings: &[&Ring]) -> Result<bool> {
    let order = ring_order(rings);
    let n = order.len();
    for ring in rings {
        let len = ring.config().num_successors.min(n - 1);
        for v in ring.vnodes() {
            let i = order
                .iter()
                .position(|o| o.id == *v.id())
                .expect("vnode in ring order");
            let expected: Vec<Vnode> = (1..=len).map(|k| order[(i + k) % n].clone()).collect();
            if v.successors().list()? != expected {
                return Ok(false);
            }
            if n > 1 && v.predecessor()? != Some(order[(i + n - 1) % n].clone()) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Run manual rounds until the rings converge. Returns the rounds it took.
pub async fn stabilize_until_converged(rings: &[&Ring], max_rounds: usize) -> Result<usize> {
    for round in 0..max_rounds {
        if converged(rings)? {
            return Ok(round);
        }
        for ring in rings {
            // failed peers are logged and dropped, not fatal here
            let _ = ring.stabilize().await;
        }
    }
    assert!(converged(rings)?, "rings did not converge in {max_rounds} rounds");
    Ok(max_rounds)
}

/// The `n` vnodes owning `key`, computed from the full ring order.
pub fn expected_owners(order: &[Vnode], ring: &Ring, key: &[u8], n: usize) -> Vec<Vnode> {
    let hash = ring.config().hash_func.digest(key);
    let first = order.iter().position(|v| v.id >= hash).unwrap_or(0);
    (0..n)
        .map(|k| order[(first + k) % order.len()].clone())
        .collect()
}
