//! Vnode references and the metadata threaded through a lookup.
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::did::Did;
use super::did::SortRing;

/// A position on the ring owned by some physical host.
/// Two vnodes are the same vnode when their ids match; `host` tells a transport where to
/// deliver calls addressed to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vnode {
    /// Position on the ring.
    pub id: Did,
    /// Address of the physical host, a socket address for network transports.
    pub host: String,
}

impl Vnode {
    /// Create a vnode reference.
    pub fn new(id: Did, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
        }
    }
}

impl fmt::Display for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.host)
    }
}

impl SortRing for Vec<Vnode> {
    fn sort(&mut self, did: &Did) {
        self.sort_by_key(|v| did.distance(&v.id));
    }
}

/// Accumulator carried along a chain of FindSuccessors calls.
///
/// The caller seeds `hop_budget`; every vnode that forwards the call increments `hops`
/// for the next hop and refuses to forward once the budget is spent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMetaData {
    /// Number of forwarded hops so far.
    pub hops: u32,
    /// Every forwarding attempt, failed ones included.
    pub attempts: u32,
    /// Upper bound of `hops`.
    pub hop_budget: u32,
    /// Peers that failed while routing this lookup.
    pub unreachable: Vec<Vnode>,
}

impl LookupMetaData {
    /// Fresh metadata with the given hop budget.
    pub fn new(hop_budget: u32) -> Self {
        Self {
            hop_budget,
            ..Default::default()
        }
    }

    /// True when no further hop is allowed.
    pub fn exhausted(&self) -> bool {
        self.hops >= self.hop_budget
    }
}
