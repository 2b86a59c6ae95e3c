//! Successor list of a vnode.
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;

use super::did::SortRing;
use super::vnode::Vnode;
use crate::error::Error;
use crate::error::Result;

/// A sequence of successors for a vnode on the ring.
/// It's necessary to have multiple successors to prevent a single point of failure.
/// Note the successors are in order of a clockwise distance from the vnode, never contain
/// the vnode itself, and an empty sequence means the vnode is its own successor.
#[derive(Debug, Clone)]
pub struct SuccessorSeq {
    /// Owner of the sequence
    owner: Vnode,
    /// Max successor num
    max: usize,
    /// Successors
    successors: Arc<RwLock<Vec<Vnode>>>,
}

impl SuccessorSeq {
    /// Empty sequence of at most `max` successors of `owner`.
    pub fn new(owner: Vnode, max: usize) -> Self {
        Self {
            owner,
            max,
            successors: Arc::new(RwLock::new(vec![])),
        }
    }

    fn successors(&self) -> Result<RwLockReadGuard<Vec<Vnode>>> {
        self.successors
            .read()
            .map_err(|_| Error::FailedToReadSuccessors)
    }

    /// Capacity of the sequence.
    pub fn max(&self) -> usize {
        self.max
    }

    /// True when the owner is its own successor.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.successors()?.is_empty())
    }

    /// Number of listed successors.
    pub fn len(&self) -> Result<usize> {
        Ok(self.successors()?.len())
    }

    /// Whether `vnode` is listed, compared by id.
    pub fn contains(&self, vnode: &Vnode) -> Result<bool> {
        Ok(self.successors()?.iter().any(|v| v.id == vnode.id))
    }

    /// Nearest successor, or the owner when the sequence is empty.
    pub fn head(&self) -> Result<Vnode> {
        Ok(self
            .successors()?
            .first()
            .cloned()
            .unwrap_or_else(|| self.owner.clone()))
    }

    /// Snapshot of the successors, nearest first.
    pub fn list(&self) -> Result<Vec<Vnode>> {
        Ok(self.successors()?.clone())
    }

    /// Insert a successor at its clockwise position. Returns true if it made the cut.
    pub fn update(&self, successor: Vnode) -> Result<bool> {
        if successor.id == self.owner.id {
            return Ok(false);
        }
        let mut succs = self
            .successors
            .write()
            .map_err(|_| Error::FailedToWriteSuccessors)?;
        if succs.iter().any(|v| v.id == successor.id) {
            return Ok(false);
        }

        let id = successor.id.clone();
        succs.push(successor);
        succs.sort(&self.owner.id);
        succs.truncate(self.max);
        Ok(succs.iter().any(|v| v.id == id))
    }

    /// Drop a successor. Returns true if it was present.
    pub fn remove(&self, vnode: &Vnode) -> Result<bool> {
        let mut succs = self
            .successors
            .write()
            .map_err(|_| Error::FailedToWriteSuccessors)?;
        let len = succs.len();
        succs.retain(|v| v.id != vnode.id);
        Ok(succs.len() != len)
    }

    /// Overwrite the sequence with `head` followed by the successors `head` reported,
    /// stopping at the owner since everything past it wraps around again.
    pub fn replace(&self, head: Vnode, reported: &[Vnode]) -> Result<()> {
        let mut next = Vec::with_capacity(self.max);
        if head.id != self.owner.id {
            next.push(head);
        }
        for v in reported {
            if next.len() >= self.max || v.id == self.owner.id {
                break;
            }
            if !next.iter().any(|n: &Vnode| n.id == v.id) {
                next.push(v.clone());
            }
        }
        let mut succs = self
            .successors
            .write()
            .map_err(|_| Error::FailedToWriteSuccessors)?;
        *succs = next;
        Ok(())
    }
}
