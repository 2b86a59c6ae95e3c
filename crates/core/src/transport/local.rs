//! In-process dispatcher.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;

use super::spawn_find_successors;
use super::BlackholeTransport;
use super::DelayConfig;
use super::DelayInjector;
use super::Transport;
use super::VnodeRpc;
use crate::dht::Did;
use crate::dht::LookupMetaData;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;

type Handler = (Vnode, Arc<dyn VnodeRpc>);

/// Serves calls addressed to locally registered vnodes with direct method calls and
/// passes everything else to a fallback transport.
///
/// In fake network mode every ring of a simulation shares one dispatcher, so the whole
/// ring lives in a single process while each call still goes through the full RPC path.
/// An optional [DelayInjector] then slows FindSuccessors down like a real link would.
pub struct LocalTransport {
    host: RwLock<Option<String>>,
    local: RwLock<HashMap<Did, Handler>>,
    remote: Arc<dyn Transport>,
    fake_network: bool,
    delay: Option<DelayInjector>,
}

impl LocalTransport {
    /// Dispatcher for one host, with `remote` for everything else.
    pub fn new(remote: Arc<dyn Transport>) -> Self {
        Self {
            host: RwLock::new(None),
            local: RwLock::new(HashMap::new()),
            remote,
            fake_network: false,
            delay: None,
        }
    }

    /// Dispatcher without any way out of the process.
    pub fn isolated() -> Self {
        Self::new(Arc::new(BlackholeTransport))
    }

    /// Dispatcher shared by every host of a simulated ring.
    pub fn fake_network(delay: Option<DelayConfig>, seed: Option<u64>) -> Self {
        Self {
            fake_network: true,
            delay: delay.map(|config| DelayInjector::new(config, seed)),
            ..Self::isolated()
        }
    }

    fn get(&self, vnode: &Vnode) -> Result<Option<Arc<dyn VnodeRpc>>> {
        let local = self
            .local
            .read()
            .map_err(|_| Error::TransportSyncLockError)?;
        Ok(local.get(&vnode.id).map(|(_, h)| h.clone()))
    }

    /// Vnodes currently registered here.
    pub fn registered(&self) -> Result<Vec<Vnode>> {
        let local = self
            .local
            .read()
            .map_err(|_| Error::TransportSyncLockError)?;
        Ok(local.values().map(|(v, _)| v.clone()).collect())
    }

    fn is_local_host(&self, host: &str) -> Result<bool> {
        let h = self
            .host
            .read()
            .map_err(|_| Error::TransportSyncLockError)?;
        Ok(h.as_deref() == Some(host))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        if self.fake_network {
            let ret: Vec<Vnode> = self
                .registered()?
                .into_iter()
                .filter(|v| v.host == host)
                .collect();
            if !ret.is_empty() {
                return Ok(ret);
            }
        } else if self.is_local_host(host)? {
            return self.registered();
        }
        self.remote.list_vnodes(host).await
    }

    async fn ping(&self, vnode: &Vnode) -> Result<bool> {
        if self.get(vnode)?.is_some() {
            return Ok(true);
        }
        self.remote.ping(vnode).await
    }

    async fn get_predecessor(&self, vnode: &Vnode) -> Result<Option<Vnode>> {
        match self.get(vnode)? {
            Some(h) => h.get_predecessor().await,
            None => self.remote.get_predecessor(vnode).await,
        }
    }

    async fn notify(&self, target: &Vnode, candidate: &Vnode) -> Result<Vec<Vnode>> {
        match self.get(target)? {
            Some(h) => h.notify(candidate).await,
            None => self.remote.notify(target, candidate).await,
        }
    }

    async fn find_successors(
        &self,
        target: &Vnode,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        if let Some(delay) = &self.delay {
            delay.wait().await;
        }
        match self.get(target)? {
            Some(h) => spawn_find_successors(h, n, key, meta).await,
            None => self.remote.find_successors(target, n, key, meta).await,
        }
    }

    async fn clear_predecessor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        match self.get(target)? {
            Some(h) => h.clear_predecessor(vnode).await,
            None => self.remote.clear_predecessor(target, vnode).await,
        }
    }

    async fn skip_successor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        match self.get(target)? {
            Some(h) => h.skip_successor(vnode).await,
            None => self.remote.skip_successor(target, vnode).await,
        }
    }

    fn register(&self, vnode: &Vnode, handler: Arc<dyn VnodeRpc>) -> Result<()> {
        {
            let mut host = self
                .host
                .write()
                .map_err(|_| Error::TransportSyncLockError)?;
            *host = Some(vnode.host.clone());
            let mut local = self
                .local
                .write()
                .map_err(|_| Error::TransportSyncLockError)?;
            local.insert(vnode.id.clone(), (vnode.clone(), handler.clone()));
        }
        self.remote.register(vnode, handler)
    }

    fn deregister(&self, vnode: &Vnode) -> Result<()> {
        {
            let mut local = self
                .local
                .write()
                .map_err(|_| Error::TransportSyncLockError)?;
            local.remove(&vnode.id);
        }
        self.remote.deregister(vnode)
    }
}
