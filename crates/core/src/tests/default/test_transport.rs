use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;

use super::join_ring;
use super::stabilize_until_converged;
use super::test_config;
use crate::dht::Did;
use crate::dht::LookupMetaData;
use crate::dht::Ring;
use crate::dht::Vnode;
use crate::error::Result;
use crate::stats::MemoryStats;
use crate::transport::BlackholeTransport;
use crate::transport::DelayConfig;
use crate::transport::DelayTransport;
use crate::transport::LocalTransport;
use crate::transport::Transport;
use crate::transport::VnodeRpc;

/// Fallback that answers every FindSuccessors with a fixed marker vnode.
struct Fallback {
    marker: Vnode,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for Fallback {
    async fn list_vnodes(&self, _host: &str) -> Result<Vec<Vnode>> {
        Ok(vec![])
    }

    async fn ping(&self, _vnode: &Vnode) -> Result<bool> {
        Ok(false)
    }

    async fn get_predecessor(&self, _vnode: &Vnode) -> Result<Option<Vnode>> {
        Ok(None)
    }

    async fn notify(&self, _target: &Vnode, _candidate: &Vnode) -> Result<Vec<Vnode>> {
        Ok(vec![])
    }

    async fn find_successors(
        &self,
        _target: &Vnode,
        _n: usize,
        _key: &Did,
        _meta: &mut LookupMetaData,
    ) -> Result<Vec<Vnode>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.marker.clone()])
    }

    async fn clear_predecessor(&self, _target: &Vnode, _vnode: &Vnode) -> Result<()> {
        Ok(())
    }

    async fn skip_successor(&self, _target: &Vnode, _vnode: &Vnode) -> Result<()> {
        Ok(())
    }

    fn register(&self, _vnode: &Vnode, _handler: Arc<dyn VnodeRpc>) -> Result<()> {
        Ok(())
    }

    fn deregister(&self, _vnode: &Vnode) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_deregistered_vnode_falls_through() -> Result<()> {
    let fallback = Arc::new(Fallback {
        marker: Vnode::new(Did::from(999), "remote"),
        calls: AtomicUsize::new(0),
    });
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(fallback.clone()));
    let ring = Ring::create(test_config("host-a", 1, 1), transport.clone()).await?;
    let local = ring.local_vnodes()[0].clone();

    let mut meta = LookupMetaData::new(8);
    let key = Did::from(5);
    assert_eq!(
        transport.find_successors(&local, 1, &key, &mut meta).await?,
        vec![local.clone()]
    );
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);

    transport.deregister(&local)?;
    assert_eq!(
        transport.find_successors(&local, 1, &key, &mut meta).await?,
        vec![fallback.marker.clone()]
    );
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_fake_network_delays_find_successors() -> Result<()> {
    let delay = DelayConfig::fixed(Duration::from_millis(5));
    let transport: Arc<dyn Transport> =
        Arc::new(LocalTransport::fake_network(Some(delay), Some(1)));
    let stats = Arc::new(MemoryStats::new());
    let a = Ring::create(
        test_config("host-a", 2, 2).with_stats(stats.clone()),
        transport.clone(),
    )
    .await?;
    let b = join_ring(&transport, "host-b", "host-a", 2, 2).await;
    stabilize_until_converged(&[&a, &b], 20).await?;

    let entry = b.local_vnodes()[0].clone();
    let (_, meta) = a.lookup_via(&entry, 1, b"slow").await?;
    let summary = stats.summary();
    assert_eq!(summary.lookups, 1);
    // one delay to enter the ring plus one per hop
    assert!(summary.max_time >= Duration::from_millis(5) * (meta.hops + 1));
    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn test_delay_transport_only_slows_find_successors() -> Result<()> {
    let local = Arc::new(LocalTransport::new(Arc::new(BlackholeTransport)));
    let config = DelayConfig::fixed(Duration::from_millis(20));
    let delayed: Arc<dyn Transport> = Arc::new(DelayTransport::new(local.clone(), config, Some(3)));
    let ring = Ring::create(test_config("host-a", 1, 1), delayed.clone()).await?;
    let v = ring.local_vnodes()[0].clone();

    // registration went through the wrapper into the dispatcher
    assert_eq!(local.registered()?, vec![v.clone()]);

    let start = Instant::now();
    assert!(delayed.ping(&v).await?);
    assert_eq!(delayed.get_predecessor(&v).await?, Some(v.clone()));
    assert!(start.elapsed() < Duration::from_millis(20));

    let start = Instant::now();
    let mut meta = LookupMetaData::new(8);
    let ret = delayed
        .find_successors(&v, 1, &Did::from(1), &mut meta)
        .await?;
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(ret, vec![v]);
    ring.shutdown().await
}
