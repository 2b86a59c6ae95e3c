//! Ring configuration.
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use derivative::Derivative;
use serde::Deserialize;
use serde::Serialize;

use crate::consts::DEFAULT_LOOKUP_HOP_BUDGET;
use crate::consts::DEFAULT_NUM_SUCCESSORS;
use crate::consts::DEFAULT_NUM_VNODES;
use crate::consts::DEFAULT_STABILIZE_MAX_MS;
use crate::consts::DEFAULT_STABILIZE_MIN_MS;
use crate::dht::Delegate;
use crate::dht::HashFunction;
use crate::error::Error;
use crate::error::Result;
use crate::stats::BlackholeStats;
use crate::stats::ChordStats;

fn default_num_vnodes() -> usize {
    DEFAULT_NUM_VNODES
}

fn default_num_successors() -> usize {
    DEFAULT_NUM_SUCCESSORS
}

fn default_stabilize_min_ms() -> u64 {
    DEFAULT_STABILIZE_MIN_MS
}

fn default_stabilize_max_ms() -> u64 {
    DEFAULT_STABILIZE_MAX_MS
}

fn default_lookup_hop_budget() -> u32 {
    DEFAULT_LOOKUP_HOP_BUDGET
}

fn default_stats() -> Arc<dyn ChordStats> {
    Arc::new(BlackholeStats)
}

/// Configuration of a [crate::dht::Ring].
///
/// Everything but the runtime attachments (`delegate`, `stats`) can be loaded from YAML;
/// omitted fields take their defaults.
#[derive(Derivative, Clone, Deserialize, Serialize)]
#[derivative(Debug)]
pub struct Config {
    /// Address of this host, e.g. `127.0.0.1:8000`. Vnode ids are derived from it.
    pub hostname: String,
    #[serde(default = "default_num_vnodes")]
    pub num_vnodes: usize,
    #[serde(default)]
    pub hash_func: HashFunction,
    #[serde(default = "default_stabilize_min_ms")]
    pub stabilize_min_ms: u64,
    #[serde(default = "default_stabilize_max_ms")]
    pub stabilize_max_ms: u64,
    /// Successor list length, also the largest replication factor a lookup may ask for.
    #[serde(default = "default_num_successors")]
    pub num_successors: usize,
    #[serde(default = "default_lookup_hop_budget")]
    pub lookup_hop_budget: u32,
    #[serde(default)]
    pub use_cache: bool,
    /// Seed of the stabilization timers. Entropy when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    pub delegate: Option<Arc<dyn Delegate>>,
    #[serde(skip, default = "default_stats")]
    #[derivative(Debug = "ignore")]
    pub stats: Arc<dyn ChordStats>,
}

impl Config {
    /// Defaults for `hostname`.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            num_vnodes: DEFAULT_NUM_VNODES,
            hash_func: HashFunction::default(),
            stabilize_min_ms: DEFAULT_STABILIZE_MIN_MS,
            stabilize_max_ms: DEFAULT_STABILIZE_MAX_MS,
            num_successors: DEFAULT_NUM_SUCCESSORS,
            lookup_hop_budget: DEFAULT_LOOKUP_HOP_BUDGET,
            use_cache: false,
            rng_seed: None,
            delegate: None,
            stats: default_stats(),
        }
    }

    /// Read a YAML config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Load config from: {:?}", path);
        let s = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&s)?;
        config.validate()?;
        Ok(config)
    }

    /// Receive ownership change callbacks on `delegate`.
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Report lookup measurements to `stats`.
    pub fn with_stats(mut self, stats: Arc<dyn ChordStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stabilize_min(&self) -> Duration {
        Duration::from_millis(self.stabilize_min_ms)
    }

    pub fn stabilize_max(&self) -> Duration {
        Duration::from_millis(self.stabilize_max_ms)
    }

    /// Reject settings the ring cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(Error::InvalidConfig("hostname is empty".to_string()));
        }
        if self.num_vnodes == 0 {
            return Err(Error::InvalidConfig("num_vnodes must be positive".to_string()));
        }
        if self.num_vnodes > u16::MAX as usize + 1 {
            return Err(Error::InvalidConfig(format!(
                "num_vnodes {} exceeds {}",
                self.num_vnodes,
                u16::MAX as usize + 1
            )));
        }
        if self.num_successors == 0 {
            return Err(Error::InvalidConfig(
                "num_successors must be positive".to_string(),
            ));
        }
        if self.lookup_hop_budget == 0 {
            return Err(Error::InvalidConfig(
                "lookup_hop_budget must be positive".to_string(),
            ));
        }
        if self.stabilize_min_ms > self.stabilize_max_ms {
            return Err(Error::InvalidConfig(format!(
                "stabilize_min_ms {} exceeds stabilize_max_ms {}",
                self.stabilize_min_ms, self.stabilize_max_ms
            )));
        }
        Ok(())
    }
}
