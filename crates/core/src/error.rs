//! Error of chord_core

use crate::dht::Did;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in chord-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to connect to {0}")]
    Unreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error from {0}: {1}")]
    Remote(String, String),

    #[error("Lookup exhausted its budget of {0} hops")]
    RoutingExhausted(u32),

    #[error("Exhausted all preceding vnodes while routing key {0}")]
    RoutingFailed(Did),

    #[error("All known successors dead")]
    AllSuccessorsDead,

    #[error("FindSuccessors task failed: {0}")]
    RoutingTask(String),

    #[error("Replication factor {requested} is out of range 1..={max}")]
    InvalidReplicationFactor { requested: usize, max: usize },

    #[error("Remote host {0} has no vnodes")]
    RemoteHostHasNoVnodes(String),

    #[error("Failed to find successor for vnode {0}: {1}")]
    JoinFindSuccessor(Did, String),

    #[error("Failed to find successor for vnode {0}: got no vnodes")]
    JoinNoSuccessor(Did),

    #[error("Inconsistent hashing for key {key}: {first} != {second}")]
    InconsistentHashing {
        key: String,
        first: String,
        second: String,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid delay entry {0:?}, expected <delayMs>:<probability>")]
    InvalidDelayEntry(String),

    #[error("The probabilities do not add up to 1, got {0}")]
    DelayProbabilitySum(f64),

    #[error("Invalid hexadecimal did")]
    BadHexDid(#[from] hex::FromHexError),

    #[error("Invalid logging level: {0}")]
    InvalidLoggingLevel(String),

    #[error("YAML config error")]
    ConfigYaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Failed to lock vnode state")]
    VnodeSyncLockError,

    #[error("Failed on read successors")]
    FailedToReadSuccessors,

    #[error("Failed on write successors")]
    FailedToWriteSuccessors,

    #[error("Failed to lock local transport registry")]
    TransportSyncLockError,

    #[error("Failed to lock stabilizer")]
    StabilizerSyncLockError,

    #[error("Ring is shut down")]
    RingShutdown,

    #[error("Multiple errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Returns `true` if the error means the remote peer could not be reached.
    /// Stabilization treats these as a dead peer and routing tries the next candidate.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable(_) | Error::Transport(_))
    }

    /// Merge two optional errors the way a leave collects failures from many vnodes.
    pub fn merge(acc: Option<Error>, next: Error) -> Error {
        match acc {
            None => next,
            Some(Error::Multiple(mut errs)) => {
                errs.push(next);
                Error::Multiple(errs)
            }
            Some(prev) => Error::Multiple(vec![prev, next]),
        }
    }
}
