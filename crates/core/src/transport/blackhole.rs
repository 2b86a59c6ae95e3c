use std::sync::Arc;

use async_trait::async_trait;

use super::Transport;
use super::VnodeRpc;
use crate::dht::Did;
use crate::dht::LookupMetaData;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;

/// A transport where every peer is unreachable.
/// Used as the fallback of an isolated [super::LocalTransport] and to simulate partitions.
#[derive(Debug, Default, Clone)]
pub struct BlackholeTransport;

fn unreachable(vnode: &Vnode) -> Error {
    Error::Unreachable(format!("{} (blackhole)", vnode))
}

#[async_trait]
impl Transport for BlackholeTransport {
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        Err(Error::Unreachable(format!("{} (blackhole)", host)))
    }

    async fn ping(&self, _vnode: &Vnode) -> Result<bool> {
        Ok(false)
    }

    async fn get_predecessor(&self, vnode: &Vnode) -> Result<Option<Vnode>> {
        Err(unreachable(vnode))
    }

    async fn notify(&self, target: &Vnode, _candidate: &Vnode) -> Result<Vec<Vnode>> {
        Err(unreachable(target))
    }

    async fn find_successors(
        &self,
        target: &Vnode,
        _n: usize,
        _key: &Did,
        _meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        Err(unreachable(target))
    }

    async fn clear_predecessor(&self, target: &Vnode, _vnode: &Vnode) -> Result<()> {
        Err(unreachable(target))
    }

    async fn skip_successor(&self, target: &Vnode, _vnode: &Vnode) -> Result<()> {
        Err(unreachable(target))
    }

    fn register(&self, _vnode: &Vnode, _handler: Arc<dyn VnodeRpc>) -> Result<()> {
        Ok(())
    }

    fn deregister(&self, _vnode: &Vnode) -> Result<()> {
        Ok(())
    }
}
