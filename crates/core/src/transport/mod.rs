#![warn(missing_docs)]
//! Transport capability of the ring.
//!
//! The protocol code in [crate::dht] never touches sockets. A vnode reaches its peers
//! through a [Transport], and serves calls addressed to itself through the [VnodeRpc]
//! handler it registers with that transport. The same protocol then runs in-process over
//! [LocalTransport] or across hosts over a network transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dht::Did;
use crate::dht::LookupMetaData;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;

mod blackhole;
mod delay;
mod local;

pub use blackhole::BlackholeTransport;
pub use delay::DelayConfig;
pub use delay::DelayInjector;
pub use delay::DelayTransport;
pub use delay::ProbabilityDelay;
pub use local::LocalTransport;

/// Calls served by a local vnode on behalf of its peers.
#[async_trait]
pub trait VnodeRpc: Send + Sync {
    /// Current predecessor of the vnode.
    async fn get_predecessor(&self) -> Result<Option<Vnode>>;

    /// `candidate` claims to be the predecessor. Returns the successor list.
    async fn notify(&self, candidate: &Vnode) -> Result<Vec<Vnode>>;

    /// Find up to `n` successors of `key`, forwarding along the ring when needed.
    async fn find_successors(
        &self,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>>;

    /// Clear the predecessor if it is still `vnode`.
    async fn clear_predecessor(&self, vnode: &Vnode) -> Result<()>;

    /// Stop listing `vnode` as a successor.
    async fn skip_successor(&self, vnode: &Vnode) -> Result<()>;
}

/// Serve FindSuccessors on a task of its own.
///
/// Every forwarded hop of an in-process walk goes through here, so hops run side by side
/// on the runtime instead of nesting on one stack, whatever the hop budget.
pub async fn spawn_find_successors(
    handler: Arc<dyn VnodeRpc>,
    n: usize,
    key: &Did,
    meta: &mut LookupMetaData,
) -> Result<Vec<Vnode>> {
    let key = key.clone();
    let mut hop_meta = std::mem::take(meta);
    let (ret, hop_meta) = tokio::spawn(async move {
        let ret = handler.find_successors(n, &key, &mut hop_meta).await;
        (ret, hop_meta)
    })
    .await
    .map_err(|e| Error::RoutingTask(e.to_string()))?;
    *meta = hop_meta;
    ret
}

/// Everything a vnode needs to talk to any other vnode, local or remote.
///
/// A peer that cannot be reached surfaces as an error for which
/// [crate::error::Error::is_unreachable] holds.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Vnodes served by `host`.
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>>;

    /// Liveness probe.
    async fn ping(&self, vnode: &Vnode) -> Result<bool>;

    /// Ask `vnode` for its predecessor.
    async fn get_predecessor(&self, vnode: &Vnode) -> Result<Option<Vnode>>;

    /// Tell `target` that `candidate` may be its predecessor.
    async fn notify(&self, target: &Vnode, candidate: &Vnode) -> Result<Vec<Vnode>>;

    /// Ask `target` for up to `n` successors of `key`.
    async fn find_successors(
        &self,
        target: &Vnode,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>>;

    /// Tell `target` that `vnode` is no longer its predecessor.
    async fn clear_predecessor(&self, target: &Vnode, vnode: &Vnode) -> Result<()>;

    /// Tell `target` to drop `vnode` from its successors.
    async fn skip_successor(&self, target: &Vnode, vnode: &Vnode) -> Result<()>;

    /// Serve future calls addressed to `vnode` with `handler`.
    fn register(&self, vnode: &Vnode, handler: Arc<dyn VnodeRpc>) -> Result<()>;

    /// Stop serving `vnode`.
    fn deregister(&self, vnode: &Vnode) -> Result<()>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where T: Transport + ?Sized
{
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        self.as_ref().list_vnodes(host).await
    }

    async fn ping(&self, vnode: &Vnode) -> Result<bool> {
        self.as_ref().ping(vnode).await
    }

    async fn get_predecessor(&self, vnode: &Vnode) -> Result<Option<Vnode>> {
        self.as_ref().get_predecessor(vnode).await
    }

    async fn notify(&self, target: &Vnode, candidate: &Vnode) -> Result<Vec<Vnode>> {
        self.as_ref().notify(target, candidate).await
    }

    async fn find_successors(
        &self,
        target: &Vnode,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        self.as_ref().find_successors(target, n, key, meta).await
    }

    async fn clear_predecessor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        self.as_ref().clear_predecessor(target, vnode).await
    }

    async fn skip_successor(&self, target: &Vnode, vnode: &Vnode) -> Result<()> {
        self.as_ref().skip_successor(target, vnode).await
    }

    fn register(&self, vnode: &Vnode, handler: Arc<dyn VnodeRpc>) -> Result<()> {
        self.as_ref().register(vnode, handler)
    }

    fn deregister(&self, vnode: &Vnode) -> Result<()> {
        self.as_ref().deregister(vnode)
    }
}
