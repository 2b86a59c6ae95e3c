//! Ring owns the local vnodes of one host.
//!
//! It creates or joins a ring, schedules stabilization of every local vnode, and answers
//! lookups by routing FindSuccessors along successor lists.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chord::LocalVnode;
use super::did::Did;
use super::stabilization::Stabilizer;
use super::types::DelegateDispatcher;
use super::vnode::LookupMetaData;
use super::vnode::Vnode;
use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;
use crate::transport::VnodeRpc;

/// The local part of a chord ring.
pub struct Ring {
    config: Config,
    transport: Arc<dyn Transport>,
    vnodes: Vec<Arc<LocalVnode>>,
    delegate: tokio::sync::Mutex<DelegateDispatcher>,
    token: CancellationToken,
    stabilizers: Mutex<Vec<JoinHandle<()>>>,
    cache: Option<DashMap<Did, (Instant, Vec<Vnode>)>>,
    closed: AtomicBool,
}

impl Ring {
    /// Bootstrap a brand new ring made of this host's vnodes only.
    pub async fn create(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let ring = Self::build(config, transport)?;
        ring.link_local_vnodes()?;
        ring.schedule()?;
        tracing::info!(
            "created ring on {} with {} vnodes",
            ring.config.hostname,
            ring.vnodes.len()
        );
        Ok(ring)
    }

    /// Join the ring `existing` is part of.
    pub async fn join(
        config: Config,
        transport: Arc<dyn Transport>,
        existing: &str,
    ) -> Result<Self> {
        let ring = Self::build(config, transport)?;
        if let Err(e) = ring.join_existing(existing).await {
            tracing::error!("[join] Failed to join {}: {:?}", existing, e);
            ring.closed.store(true, Ordering::SeqCst);
            ring.deregister_all();
            return Err(e);
        }
        ring.schedule()?;
        tracing::info!("{} joined ring through {}", ring.config.hostname, existing);
        Ok(ring)
    }

    fn build(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let delegate = DelegateDispatcher::spawn(config.delegate.clone());

        let mut vnodes = Vec::with_capacity(config.num_vnodes);
        for idx in 0..config.num_vnodes {
            let id = config
                .hash_func
                .vnode_id(&config.hostname, idx as u16);
            vnodes.push(Arc::new(LocalVnode::new(
                Vnode::new(id, config.hostname.clone()),
                config.num_successors,
                transport.clone(),
                delegate.sender(),
            )));
        }
        vnodes.sort_by(|a, b| a.id().cmp(b.id()));

        let all: Vec<Vnode> = vnodes.iter().map(|v| v.vnode().clone()).collect();
        for v in &vnodes {
            v.set_siblings(all.clone())?;
            transport.register(v.vnode(), v.clone())?;
        }

        let cache = config.use_cache.then(DashMap::new);
        Ok(Self {
            config,
            transport,
            vnodes,
            delegate: tokio::sync::Mutex::new(delegate),
            token: CancellationToken::new(),
            stabilizers: Mutex::new(vec![]),
            cache,
            closed: AtomicBool::new(false),
        })
    }

    /// Chain the local vnodes to each other. A lone vnode is its own successor and
    /// predecessor.
    fn link_local_vnodes(&self) -> Result<()> {
        let n = self.vnodes.len();
        let num_succ = self.config.num_successors.min(n - 1);
        for (i, v) in self.vnodes.iter().enumerate() {
            for k in 1..=num_succ {
                v.successors()
                    .update(self.vnodes[(i + k) % n].vnode().clone())?;
            }
            v.set_predecessor(Some(self.vnodes[(i + n - 1) % n].vnode().clone()))?;
        }
        Ok(())
    }

    async fn join_existing(&self, existing: &str) -> Result<()> {
        let mut remotes = self.transport.list_vnodes(existing).await?;
        if remotes.is_empty() {
            return Err(Error::RemoteHostHasNoVnodes(existing.to_string()));
        }
        remotes.sort_by(|a, b| a.id.cmp(&b.id));

        for v in &self.vnodes {
            let nearest = remotes
                .iter()
                .rev()
                .find(|r| r.id < *v.id())
                .or_else(|| remotes.last())
                .ok_or_else(|| Error::RemoteHostHasNoVnodes(existing.to_string()))?;
            let mut meta = LookupMetaData::new(self.config.lookup_hop_budget);
            let succs = self
                .transport
                .find_successors(nearest, self.config.num_successors, v.id(), &mut meta)
                .await
                .map_err(|e| Error::JoinFindSuccessor(v.id().clone(), e.to_string()))?;
            if succs.is_empty() {
                return Err(Error::JoinNoSuccessor(v.id().clone()));
            }
            for s in succs {
                v.successors().update(s)?;
            }
            tracing::debug!("[join] {} starts at {}", v.vnode(), v.successors().head()?);
        }

        // fast stabilization, the scheduler takes over afterwards
        self.stabilize().await
    }

    fn schedule(&self) -> Result<()> {
        let mut handles = self
            .stabilizers
            .lock()
            .map_err(|_| Error::StabilizerSyncLockError)?;
        for (idx, v) in self.vnodes.iter().enumerate() {
            let stabilizer = Stabilizer::new(
                v.clone(),
                self.config.stabilize_min(),
                self.config.stabilize_max(),
                self.config.rng_seed.map(|s| s.wrapping_add(idx as u64)),
            );
            handles.push(tokio::spawn(stabilizer.wait(self.token.clone())));
        }
        Ok(())
    }

    /// Run one stabilization round on every local vnode concurrently.
    pub async fn stabilize(&self) -> Result<()> {
        let mut err = None;
        for res in join_all(self.vnodes.iter().map(|v| v.stabilize())).await {
            if let Err(e) = res {
                err = Some(Error::merge(err, e));
            }
        }
        match err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::RingShutdown);
        }
        Ok(())
    }

    fn check_replication(&self, n: usize) -> Result<()> {
        if n == 0 || n > self.config.num_successors {
            return Err(Error::InvalidReplicationFactor {
                requested: n,
                max: self.config.num_successors,
            });
        }
        Ok(())
    }

    /// The local vnode with the greatest id below `key`, wrapping to the last one.
    fn entry_vnode(&self, key: &Did) -> Result<&Arc<LocalVnode>> {
        self.vnodes
            .iter()
            .rev()
            .find(|v| v.id() < key)
            .or_else(|| self.vnodes.last())
            .ok_or(Error::RingShutdown)
    }

    /// Find the `n` vnodes owning `key`, nearest first.
    pub async fn lookup(&self, n: usize, key: &[u8]) -> Result<Vec<Vnode>> {
        self.check_open()?;
        self.check_replication(n)?;
        let key = self.config.hash_func.digest(key);

        if let Some(hit) = self.cached(n, &key).await {
            return Ok(hit);
        }

        let entry = self.entry_vnode(&key)?;
        let mut meta = LookupMetaData::new(self.config.lookup_hop_budget);
        let start = Instant::now();
        let res = entry.find_successors(n, &key, &mut meta).await;
        let ret = self.record(res, &meta, start)?;

        if let Some(cache) = &self.cache {
            cache.insert(key, (Instant::now(), ret.clone()));
        }
        Ok(ret)
    }

    /// Like [Ring::lookup], entering the ring at `entry`, which may be any vnode the
    /// transport reaches. Returns the lookup metadata too.
    pub async fn lookup_via(
        &self,
        entry: &Vnode,
        n: usize,
        key: &[u8],
    ) -> Result<(Vec<Vnode>, LookupMetaData)> {
        self.check_open()?;
        self.check_replication(n)?;
        let key = self.config.hash_func.digest(key);
        let mut meta = LookupMetaData::new(self.config.lookup_hop_budget);
        let start = Instant::now();
        let res = self.transport.find_successors(entry, n, &key, &mut meta).await;
        let ret = self.record(res, &meta, start)?;
        Ok((ret, meta))
    }

    /// Look `key` up from every vnode in `entries` and fail if any two answers differ.
    pub async fn cross_validate(
        &self,
        n: usize,
        key: &[u8],
        entries: &[Vnode],
    ) -> Result<Vec<Vnode>> {
        let mut first: Option<Vec<Vnode>> = None;
        for entry in entries {
            let (ret, _) = self.lookup_via(entry, n, key).await?;
            match &first {
                None => first = Some(ret),
                Some(f) if *f != ret => {
                    return Err(Error::InconsistentHashing {
                        key: hex::encode(key),
                        first: format!("{:?}", f),
                        second: format!("{:?}", ret),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(first.unwrap_or_default())
    }

    fn record(
        &self,
        res: Result<Vec<Vnode>>,
        meta: &LookupMetaData,
        start: Instant,
    ) -> Result<Vec<Vnode>> {
        let stats = &self.config.stats;
        stats.lookup_attempts(meta.attempts);
        let ret = res?;
        stats.lookup_hops(meta.hops);
        stats.lookup_time(start.elapsed());
        tracing::debug!(
            "lookup done in {} hops, {} unreachable",
            meta.hops,
            meta.unreachable.len()
        );
        Ok(ret)
    }

    /// A cached answer is good for one stabilization period, and only while its owner
    /// still answers.
    async fn cached(&self, n: usize, key: &Did) -> Option<Vec<Vnode>> {
        let cache = self.cache.as_ref()?;
        let entry = cache.get(key).map(|e| e.value().clone());
        let stats = &self.config.stats;
        let Some((at, owners)) = entry else {
            stats.cache_miss();
            return None;
        };
        let fresh = at.elapsed() < self.config.stabilize_max() && owners.len() >= n;
        let alive = match owners.first() {
            Some(owner) if fresh => matches!(self.transport.ping(owner).await, Ok(true)),
            _ => false,
        };
        if alive {
            stats.cache_hit();
            Some(owners.into_iter().take(n).collect())
        } else {
            cache.remove(key);
            stats.cache_miss();
            None
        }
    }

    /// Leave the ring gracefully, telling the neighbours of every local vnode.
    pub async fn leave(&self) -> Result<()> {
        self.close().await?;
        let mut err = None;
        for res in join_all(self.vnodes.iter().map(|v| v.leave())).await {
            if let Err(e) = res {
                err = Some(Error::merge(err, e));
            }
        }
        self.deregister_all();
        self.delegate.lock().await.shutdown().await;
        match err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Stop without telling anyone. Peers find out through failed pings.
    pub async fn shutdown(&self) -> Result<()> {
        self.close().await?;
        self.deregister_all();
        self.delegate.lock().await.shutdown().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::RingShutdown);
        }
        self.token.cancel();
        let handles = {
            let mut h = self
                .stabilizers
                .lock()
                .map_err(|_| Error::StabilizerSyncLockError)?;
            std::mem::take(&mut *h)
        };
        for h in handles {
            if let Err(e) = h.await {
                tracing::error!("[shutdown] stabilizer task failed {:?}", e);
            }
        }
        Ok(())
    }

    fn deregister_all(&self) {
        for v in &self.vnodes {
            if let Err(e) = self.transport.deregister(v.vnode()) {
                tracing::warn!("[shutdown] Failed to deregister {}: {:?}", v.vnode(), e);
            }
        }
    }

    /// Local vnodes sorted by id.
    pub fn vnodes(&self) -> &[Arc<LocalVnode>] {
        &self.vnodes
    }

    /// References of the local vnodes sorted by id.
    pub fn local_vnodes(&self) -> Vec<Vnode> {
        self.vnodes.iter().map(|v| v.vnode().clone()).collect()
    }

    /// Configuration the ring was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transport shared by the local vnodes.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.token.cancel();
            self.deregister_all();
        }
    }
}
