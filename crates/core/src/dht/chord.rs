#![warn(missing_docs)]
//! Local vnode state machine.
//!
//! A [LocalVnode] keeps its successor list and predecessor, serves the RPCs its peers send
//! it, and repairs its own state during stabilization rounds.
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;

use super::did::Did;
use super::successor::SuccessorSeq;
use super::types::DelegateEvent;
use super::types::DelegateSender;
use super::vnode::LookupMetaData;
use super::vnode::Vnode;
use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;
use crate::transport::VnodeRpc;

/// A vnode hosted by this process.
pub struct LocalVnode {
    vnode: Vnode,
    successors: SuccessorSeq,
    predecessor: RwLock<Option<Vnode>>,
    transport: Arc<dyn Transport>,
    delegate: DelegateSender,
    stabilized: Mutex<Option<Instant>>,
    /// Other vnodes of the same host, the fallback once every listed successor is dead.
    siblings: RwLock<Vec<Vnode>>,
}

impl LocalVnode {
    /// Create a vnode with an empty successor list and no predecessor.
    pub fn new(
        vnode: Vnode,
        num_successors: usize,
        transport: Arc<dyn Transport>,
        delegate: DelegateSender,
    ) -> Self {
        Self {
            successors: SuccessorSeq::new(vnode.clone(), num_successors),
            vnode,
            predecessor: RwLock::new(None),
            transport,
            delegate,
            stabilized: Mutex::new(None),
            siblings: RwLock::new(vec![]),
        }
    }

    /// Set the vnodes hosted next to this one.
    pub fn set_siblings(&self, siblings: Vec<Vnode>) -> Result<()> {
        let mut s = self
            .siblings
            .write()
            .map_err(|_| Error::VnodeSyncLockError)?;
        *s = siblings.into_iter().filter(|v| !self.is_self(v)).collect();
        Ok(())
    }

    /// Reference of this vnode.
    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    /// Id of this vnode.
    pub fn id(&self) -> &Did {
        &self.vnode.id
    }

    /// Successor list of this vnode.
    pub fn successors(&self) -> &SuccessorSeq {
        &self.successors
    }

    /// Current predecessor.
    pub fn predecessor(&self) -> Result<Option<Vnode>> {
        self.predecessor
            .read()
            .map(|p| p.clone())
            .map_err(|_| Error::VnodeSyncLockError)
    }

    /// Overwrite the predecessor.
    pub fn set_predecessor(&self, pred: Option<Vnode>) -> Result<()> {
        let mut p = self
            .predecessor
            .write()
            .map_err(|_| Error::VnodeSyncLockError)?;
        *p = pred;
        Ok(())
    }

    /// When the last stabilization round finished.
    pub fn last_stabilized(&self) -> Result<Option<Instant>> {
        self.stabilized
            .lock()
            .map(|s| *s)
            .map_err(|_| Error::VnodeSyncLockError)
    }

    fn is_self(&self, vnode: &Vnode) -> bool {
        vnode.id == self.vnode.id
    }

    /// Run one stabilization round.
    pub async fn stabilize(&self) -> Result<()> {
        tracing::debug!("STABILIZATION {} check_new_successor start", self.vnode);
        let mut dropped = vec![];
        match self.check_new_successor(&mut dropped).await {
            Ok(()) => {
                tracing::debug!("STABILIZATION {} notify_successor start", self.vnode);
                if let Err(e) = self.notify_successor(&dropped).await {
                    tracing::error!("[stabilize] Failed on notify successor {:?}", e);
                }
            }
            Err(e) => tracing::error!("[stabilize] Failed on check new successor {:?}", e),
        }
        tracing::debug!("STABILIZATION {} check_predecessor start", self.vnode);
        if let Err(e) = self.check_predecessor().await {
            tracing::error!("[stabilize] Failed on check predecessor {:?}", e);
        }

        let mut stabilized = self
            .stabilized
            .lock()
            .map_err(|_| Error::VnodeSyncLockError)?;
        *stabilized = Some(Instant::now());
        Ok(())
    }

    /// Make sure the head successor is alive, then splice in a closer one if it knows any.
    async fn check_new_successor(&self, dropped: &mut Vec<Vnode>) -> Result<()> {
        let succ = self.live_successor(dropped).await?;
        // a vnode alone on the ring asks itself, (self, self) is the whole circle
        let maybe_new = self.transport.get_predecessor(&succ).await?;
        if let Some(p) = maybe_new {
            if p.id.in_range(&self.vnode.id, &succ.id) {
                match self.transport.ping(&p).await {
                    Ok(true) => {
                        tracing::debug!("STABILIZATION {} new successor {}", self.vnode, p);
                        self.successors.update(p)?;
                    }
                    _ => tracing::debug!(
                        "STABILIZATION {} ignore unreachable predecessor {} of successor",
                        self.vnode,
                        p
                    ),
                }
            }
        }
        Ok(())
    }

    /// Ping successors from the head on, dropping the dead ones into `dropped`.
    ///
    /// Once the list runs dry it is refilled from the sibling vnodes, and failing that the
    /// vnode falls back to being its own successor until stabilization finds a new one.
    async fn live_successor(&self, dropped: &mut Vec<Vnode>) -> Result<Vnode> {
        let mut reseeded = false;
        loop {
            let head = self.successors.head()?;
            if self.is_self(&head) {
                return Ok(head);
            }
            if let Ok(true) = self.transport.ping(&head).await {
                return Ok(head);
            }
            tracing::warn!("[stabilize] {} drops dead successor {}", self.vnode, head);
            self.successors.remove(&head)?;
            self.delegate.send(DelegateEvent::SuccessorLeaving {
                local: self.vnode.clone(),
                remote: head.clone(),
            });
            self.propagate_skip(&head).await?;
            dropped.push(head);

            if self.successors.is_empty()? && !reseeded {
                reseeded = true;
                self.reseed(dropped)?;
            }
        }
    }

    fn reseed(&self, dropped: &[Vnode]) -> Result<()> {
        let siblings = self
            .siblings
            .read()
            .map_err(|_| Error::VnodeSyncLockError)?
            .clone();
        tracing::warn!(
            "[stabilize] {} lost all successors, falling back to {} siblings",
            self.vnode,
            siblings.len()
        );
        for s in siblings {
            if !dropped.iter().any(|d| d.id == s.id) {
                self.successors.update(s)?;
            }
        }
        Ok(())
    }
    /// Ask the predecessor to stop listing a dead successor too.
    async fn propagate_skip(&self, dead: &Vnode) -> Result<()> {
        if let Some(pred) = self.predecessor()? {
            if !self.is_self(&pred) && pred.id != dead.id {
                if let Err(e) = self.transport.skip_successor(&pred, dead).await {
                    tracing::debug!("[stabilize] skip_successor to {} failed {:?}", pred, e);
                }
            }
        }
        Ok(())
    }

    /// Tell the successor about us and take over its successor list, minus the vnodes
    /// this round found dead.
    async fn notify_successor(&self, dropped: &[Vnode]) -> Result<()> {
        let succ = self.successors.head()?;
        if self.is_self(&succ) {
            return Ok(());
        }
        let reported: Vec<Vnode> = self
            .transport
            .notify(&succ, &self.vnode)
            .await?
            .into_iter()
            .filter(|v| !dropped.iter().any(|d| d.id == v.id))
            .collect();
        self.successors.replace(succ, &reported)
    }

    /// Forget a predecessor that stopped answering.
    async fn check_predecessor(&self) -> Result<()> {
        let Some(pred) = self.predecessor()? else {
            return Ok(());
        };
        if self.is_self(&pred) {
            return Ok(());
        }
        match self.transport.ping(&pred).await {
            Ok(true) => Ok(()),
            res => {
                tracing::warn!("[stabilize] {} lost predecessor {}: {:?}", self.vnode, pred, res);
                let mut p = self
                    .predecessor
                    .write()
                    .map_err(|_| Error::VnodeSyncLockError)?;
                if p.as_ref() == Some(&pred) {
                    *p = None;
                }
                Ok(())
            }
        }
    }

    /// Leave the ring gracefully: hand our neighbours to each other.
    pub async fn leave(&self) -> Result<()> {
        let pred = self.predecessor()?;
        let succ = self.successors.head()?;
        self.delegate.send(DelegateEvent::Leaving {
            local: self.vnode.clone(),
            predecessor: pred.clone(),
            successor: succ.clone(),
        });

        let mut err = None;
        if let Some(pred) = pred.filter(|p| !self.is_self(p)) {
            if let Err(e) = self.transport.skip_successor(&pred, &self.vnode).await {
                tracing::warn!("[leave] {} skip_successor on {} failed {:?}", self.vnode, pred, e);
                err = Some(Error::merge(err, e));
            }
        }
        if !self.is_self(&succ) {
            if let Err(e) = self.transport.clear_predecessor(&succ, &self.vnode).await {
                tracing::warn!("[leave] {} clear_predecessor on {} failed {:?}", self.vnode, succ, e);
                err = Some(Error::merge(err, e));
            }
        }
        match err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Successors of `key` known without routing, if the key falls into our
    /// successor list.
    fn known_successors(&self, n: usize, key: &Did, succs: &[Vnode]) -> Option<Vec<Vnode>> {
        let Some(head) = succs.first() else {
            return Some(vec![self.vnode.clone()]);
        };
        if key.in_range_right_incl(&self.vnode.id, &head.id) {
            return Some(succs.iter().take(n).cloned().collect());
        }
        None
    }
}

#[async_trait]
impl VnodeRpc for LocalVnode {
    async fn get_predecessor(&self) -> Result<Option<Vnode>> {
        self.predecessor()
    }

    async fn notify(&self, candidate: &Vnode) -> Result<Vec<Vnode>> {
        if !self.is_self(candidate) {
            let mut p = self
                .predecessor
                .write()
                .map_err(|_| Error::VnodeSyncLockError)?;
            let adopt = match p.as_ref() {
                None => true,
                Some(pred) if self.is_self(pred) => true,
                Some(pred) => candidate.id.in_range(&pred.id, &self.vnode.id),
            };
            if adopt {
                tracing::debug!("{} adopts predecessor {}", self.vnode, candidate);
                let previous = p.replace(candidate.clone());
                self.delegate.send(DelegateEvent::NewPredecessor {
                    local: self.vnode.clone(),
                    new: candidate.clone(),
                    previous,
                });
            }
        }
        self.successors.list()
    }

    async fn find_successors(
        &self,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        let succs = self.successors.list()?;
        if let Some(ret) = self.known_successors(n, key, &succs) {
            return Ok(ret);
        }
        if meta.exhausted() {
            tracing::warn!(
                "[find_successors] {} gives up on {} after {} hops",
                self.vnode,
                key,
                meta.hops
            );
            return Err(Error::RoutingExhausted(meta.hops));
        }

        // closest preceding successors first
        let candidates = succs
            .iter()
            .rev()
            .filter(|s| s.id.in_range(&self.vnode.id, key));
        for cand in candidates {
            let hops = meta.hops;
            meta.hops += 1;
            meta.attempts += 1;
            match self.transport.find_successors(cand, n, key, meta).await {
                Ok(ret) => return Ok(ret),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(
                        "[find_successors] {} failed to forward to {}: {:?}",
                        self.vnode,
                        cand,
                        e
                    );
                    meta.hops = hops;
                    meta.unreachable.push(cand.clone());
                }
                Err(e) => return Err(e),
            }
        }

        // a further successor may still own the key
        for (i, pair) in succs.windows(2).enumerate() {
            if key.in_range_right_incl(&pair[0].id, &pair[1].id) {
                return Ok(succs[i + 1..].iter().take(n).cloned().collect());
            }
        }
        Err(Error::RoutingFailed(key.clone()))
    }

    async fn clear_predecessor(&self, vnode: &Vnode) -> Result<()> {
        let mut p = self
            .predecessor
            .write()
            .map_err(|_| Error::VnodeSyncLockError)?;
        if p.as_ref().map(|p| p.id == vnode.id).unwrap_or(false) {
            *p = None;
            self.delegate.send(DelegateEvent::PredecessorLeaving {
                local: self.vnode.clone(),
                remote: vnode.clone(),
            });
        }
        Ok(())
    }

    async fn skip_successor(&self, vnode: &Vnode) -> Result<()> {
        if self.successors.remove(vnode)? {
            self.delegate.send(DelegateEvent::SuccessorLeaving {
                local: self.vnode.clone(),
                remote: vnode.clone(),
            });
        }
        Ok(())
    }
}
