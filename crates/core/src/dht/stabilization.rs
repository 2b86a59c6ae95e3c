//! Stabilization run daemons to maintain dht.

use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use futures::pin_mut;
use futures::select;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use super::chord::LocalVnode;

/// The stabilization runner of one local vnode.
///
/// Each round waits a random interval in `[min, max]` so vnodes across the ring do not
/// stabilize in lockstep.
pub struct Stabilizer {
    vnode: Arc<LocalVnode>,
    min: Duration,
    max: Duration,
    rng: StdRng,
}

impl Stabilizer {
    /// Create a new stabilization runner.
    pub fn new(vnode: Arc<LocalVnode>, min: Duration, max: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            vnode,
            min,
            max,
            rng,
        }
    }

    /// Interval before the next round.
    pub fn next_interval(&mut self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        self.rng.gen_range(self.min..=self.max)
    }

    /// Run stabilization in a loop until `token` is cancelled.
    pub async fn wait(mut self, token: CancellationToken) {
        loop {
            let timeout = tokio::time::sleep(self.next_interval()).fuse();
            let cancelled = token.cancelled().fuse();
            pin_mut!(timeout, cancelled);
            select! {
                _ = timeout => self
                    .vnode
                    .stabilize()
                    .await
                    .unwrap_or_else(|e| tracing::error!("failed to stabilize {:?}", e)),
                _ = cancelled => {
                    tracing::debug!("STABILIZATION {} stopped", self.vnode.vnode());
                    break;
                }
            }
        }
    }
}
