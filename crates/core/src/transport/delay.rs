//! Artificial latency for simulated networks.
//!
//! A delay table is written as `"<delayMs>:<probability>|<delayMs>:<probability>|..."`,
//! e.g. `"200:.1|300:.2|0:.7"` delays 200ms 10% of the time, 300ms 20% of the time and
//! not at all otherwise. Probabilities must add up to 1.
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::Transport;
use super::VnodeRpc;
use crate::consts::DEFAULT_FIND_SUCCESSORS_DELAY_MS;
use crate::dht::Did;
use crate::dht::LookupMetaData;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;

/// Probabilities are accumulated in integer parts per billion so cumulative boundaries
/// match the written decimals exactly.
const PROBABILITY_SCALE: f64 = 1e9;
/// One part per billion.
const PROBABILITY_TOLERANCE: u64 = 1;

/// One entry of a delay table. `probability` is cumulative over the preceding entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityDelay {
    /// Cumulative probability, the last entry of a table is 1.
    pub probability: f64,
    /// Delay picked when a draw lands in this entry.
    pub delay: Duration,
}

/// Delays applied before every FindSuccessors call.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayConfig {
    /// Fixed part, always applied.
    pub find_successors_delay: Duration,
    /// Random part, drawn from a cumulative probability table.
    pub random_delays: Vec<ProbabilityDelay>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            find_successors_delay: Duration::from_millis(DEFAULT_FIND_SUCCESSORS_DELAY_MS),
            random_delays: vec![],
        }
    }
}

impl DelayConfig {
    /// Fixed delay only.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            find_successors_delay: delay,
            random_delays: vec![],
        }
    }

    /// Replace the random part with a table parsed from its string form.
    pub fn with_random_delays(mut self, table: &str) -> Result<Self> {
        self.random_delays = parse_table(table)?;
        Ok(self)
    }

    /// Upper bound of a single injected delay.
    pub fn max_possible_delay(&self) -> Duration {
        let max = self
            .random_delays
            .iter()
            .map(|d| d.delay)
            .max()
            .unwrap_or_default();
        self.find_successors_delay + max
    }

    /// Random part of the delay for a uniform draw `r` in `[0, 1)`:
    /// the first entry whose cumulative probability exceeds `r`.
    pub fn pick(&self, r: f64) -> Duration {
        self.random_delays
            .iter()
            .find(|d| d.probability > r)
            .map(|d| d.delay)
            .unwrap_or_default()
    }
}

fn parse_table(s: &str) -> Result<Vec<ProbabilityDelay>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(vec![]);
    }
    let mut ret = vec![];
    let mut total: u64 = 0;
    for entry in s.split('|') {
        let (delay, prob) = entry
            .split_once(':')
            .ok_or_else(|| Error::InvalidDelayEntry(entry.to_string()))?;
        let delay: u64 = delay
            .trim()
            .parse()
            .map_err(|_| Error::InvalidDelayEntry(entry.to_string()))?;
        let prob: f64 = prob
            .trim()
            .parse()
            .map_err(|_| Error::InvalidDelayEntry(entry.to_string()))?;
        if !(0.0..=1.0).contains(&prob) {
            return Err(Error::InvalidDelayEntry(entry.to_string()));
        }
        total += (prob * PROBABILITY_SCALE).round() as u64;
        ret.push(ProbabilityDelay {
            probability: total as f64 / PROBABILITY_SCALE,
            delay: Duration::from_millis(delay),
        });
    }
    if total.abs_diff(PROBABILITY_SCALE as u64) > PROBABILITY_TOLERANCE {
        return Err(Error::DelayProbabilitySum(total as f64 / PROBABILITY_SCALE));
    }
    // pin the last entry so a draw close to 1 always lands in the table
    if let Some(last) = ret.last_mut() {
        last.probability = 1.0;
    }
    Ok(ret)
}

/// Parses a table-only config. The fixed part is zero.
impl FromStr for DelayConfig {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::fixed(Duration::ZERO).with_random_delays(s)
    }
}

/// Draws delays from a [DelayConfig] with its own seeded generator.
#[derive(Debug)]
pub struct DelayInjector {
    config: DelayConfig,
    rng: Mutex<StdRng>,
}

impl DelayInjector {
    /// Seeded injectors draw the same delays in the same order.
    pub fn new(config: DelayConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The table delays are drawn from.
    pub fn config(&self) -> &DelayConfig {
        &self.config
    }

    /// Total delay of the next call.
    pub fn next_delay(&self) -> Duration {
        let random = if self.config.random_delays.is_empty() {
            Duration::ZERO
        } else {
            match self.rng.lock() {
                Ok(mut rng) => self.config.pick(rng.gen::<f64>()),
                Err(_) => {
                    tracing::warn!("[delay] generator lock poisoned, skip random delay");
                    Duration::ZERO
                }
            }
        };
        self.config.find_successors_delay + random
    }

    /// Sleep for the next delay.
    pub async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Wraps a transport and delays FindSuccessors. Every other call goes straight through.
pub struct DelayTransport<T> {
    inner: T,
    injector: Arc<DelayInjector>,
}

impl<T> DelayTransport<T>
where T: Transport
{
    /// Wrap `inner`, drawing delays from `config`.
    pub fn new(inner: T, config: DelayConfig, seed: Option<u64>) -> Self {
        Self {
            inner,
            injector: Arc::new(DelayInjector::new(config, seed)),
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T> Transport for DelayTransport<T>
where T: Transport
{
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        self.inner.list_vnodes(host).await
    }

    async fn ping(&self, vnode: &Vnode) -> Result<bool> {
        self.inner.ping(vnode).await
    }

    async fn get_predecessor(&self, vnode: &Vnode) -> Result<Option<Vnode>> {
        self.inner.get_predecessor(vnode).await
    }

    async fn notify(&self, target: &Vnode, candidate: &Vnode) -> Result<Vec<Vnode>> {
        self.inner.notify(target, candidate).await
    }

    async fn find_successors(
        &self,
        target: &Vnode,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        self.injector.wait().await;
        self.inner.find_successors(target, n, key, meta).await
    }

    async fn clear_predecessor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        self.inner.clear_predecessor(target, vnode).await
    }

    async fn skip_successor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        self.inner.skip_successor(target, vnode).await
    }

    fn register(&self, vnode: &Vnode, handler: Arc<dyn VnodeRpc>) -> Result<()> {
        self.inner.register(vnode, handler)
    }

    fn deregister(&self, vnode: &Vnode) -> Result<()> {
        self.inner.deregister(vnode)
    }
}
