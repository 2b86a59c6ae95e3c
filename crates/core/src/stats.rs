#![warn(missing_docs)]
//! Statistics sink of the ring.
//!
//! The ring reports every finished lookup and every lookup cache check to a [ChordStats]
//! implementation. Where the numbers go is up to the application: [BlackholeStats] drops
//! them, [MemoryStats] keeps a summary in memory which a harness can log when it is done.
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Receives lookup measurements.
pub trait ChordStats: Send + Sync {
    /// Number of hops a successful lookup took.
    fn lookup_hops(&self, hops: u32);
    /// Wall clock duration of a successful lookup.
    fn lookup_time(&self, elapsed: Duration);
    /// Forwarding attempts of a lookup, failed ones included.
    fn lookup_attempts(&self, attempts: u32);
    /// The lookup cache answered.
    fn cache_hit(&self);
    /// The lookup cache had no usable entry.
    fn cache_miss(&self);
}

/// Drops every measurement.
#[derive(Debug, Default, Clone)]
pub struct BlackholeStats;

impl ChordStats for BlackholeStats {
    fn lookup_hops(&self, _hops: u32) {}
    fn lookup_time(&self, _elapsed: Duration) {}
    fn lookup_attempts(&self, _attempts: u32) {}
    fn cache_hit(&self) {}
    fn cache_miss(&self) {}
}

/// Aggregated measurements.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    /// Successful lookups.
    pub lookups: u64,
    /// Fewest hops of a lookup.
    pub min_hops: u32,
    /// Most hops of a lookup.
    pub max_hops: u32,
    /// Average hops per lookup.
    pub avg_hops: f64,
    /// Slowest lookup.
    pub max_time: Duration,
    /// Average lookup duration.
    pub avg_time: Duration,
    /// Forwarding attempts over all lookups.
    pub attempts: u64,
    /// Lookup cache hits.
    pub cache_hits: u64,
    /// Lookup cache misses.
    pub cache_misses: u64,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "lookups={} hops(min/avg/max)={}/{:.2}/{} time(avg/max)={:?}/{:?} attempts={} cache(hit/miss)={}/{}",
            self.lookups,
            self.min_hops,
            self.avg_hops,
            self.max_hops,
            self.avg_time,
            self.max_time,
            self.attempts,
            self.cache_hits,
            self.cache_misses
        )
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    hops: Vec<u32>,
    times: Vec<Duration>,
    attempts: u64,
    cache_hits: u64,
    cache_misses: u64,
}

/// Keeps measurements in memory.
#[derive(Debug, Default)]
pub struct MemoryStats {
    inner: Mutex<Accumulator>,
}

impl MemoryStats {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, f: impl FnOnce(&mut Accumulator)) {
        match self.inner.lock() {
            Ok(mut acc) => f(&mut acc),
            Err(_) => tracing::warn!("[stats] accumulator lock poisoned, measurement dropped"),
        }
    }

    /// Summary of everything recorded so far.
    pub fn summary(&self) -> StatsSummary {
        let Ok(acc) = self.inner.lock() else {
            return StatsSummary::default();
        };
        let lookups = acc.hops.len() as u64;
        let total_hops: u64 = acc.hops.iter().map(|h| *h as u64).sum();
        let total_time: Duration = acc.times.iter().sum();
        StatsSummary {
            lookups,
            min_hops: acc.hops.iter().copied().min().unwrap_or_default(),
            max_hops: acc.hops.iter().copied().max().unwrap_or_default(),
            avg_hops: if lookups == 0 {
                0.0
            } else {
                total_hops as f64 / lookups as f64
            },
            max_time: acc.times.iter().copied().max().unwrap_or_default(),
            avg_time: if acc.times.is_empty() {
                Duration::ZERO
            } else {
                total_time / acc.times.len() as u32
            },
            attempts: acc.attempts,
            cache_hits: acc.cache_hits,
            cache_misses: acc.cache_misses,
        }
    }
}

impl ChordStats for MemoryStats {
    fn lookup_hops(&self, hops: u32) {
        self.record(|acc| acc.hops.push(hops))
    }

    fn lookup_time(&self, elapsed: Duration) {
        self.record(|acc| acc.times.push(elapsed))
    }

    fn lookup_attempts(&self, attempts: u32) {
        self.record(|acc| acc.attempts += attempts as u64)
    }

    fn cache_hit(&self) {
        self.record(|acc| acc.cache_hits += 1)
    }

    fn cache_miss(&self) {
        self.record(|acc| acc.cache_misses += 1)
    }
}
