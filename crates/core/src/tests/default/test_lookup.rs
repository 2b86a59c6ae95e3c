use std::sync::Arc;

use super::test_config;
use crate::consts::DEFAULT_LOOKUP_HOP_BUDGET;
use crate::dht::types::DelegateSender;
use crate::dht::Did;
use crate::dht::LocalVnode;
use crate::dht::LookupMetaData;
use crate::dht::Ring;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;
use crate::transport::LocalTransport;
use crate::transport::Transport;
use crate::transport::VnodeRpc;

/// One host, a long successor chain: every vnode only knows the next one.
async fn chain_ring(num_vnodes: usize, hop_budget: u32) -> Ring {
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::isolated());
    let mut config = test_config("host-a", num_vnodes, 1);
    config.lookup_hop_budget = hop_budget;
    Ring::create(config, transport).await.unwrap()
}

/// Entry vnode right after the owner of `key`, so routing walks almost the whole ring.
fn far_entry(ring: &Ring, key: &[u8]) -> (Vnode, usize) {
    let order = ring.local_vnodes();
    let hash = ring.config().hash_func.digest(key);
    let owner = order.iter().position(|v| v.id >= hash).unwrap_or(0);
    (order[(owner + 1) % order.len()].clone(), order.len() - 2)
}

#[tokio::test]
async fn test_walk_counts_hops() -> Result<()> {
    let ring = chain_ring(16, 1024).await;
    let (entry, expected_hops) = far_entry(&ring, b"walk");

    let (owners, meta) = ring.lookup_via(&entry, 1, b"walk").await?;
    assert_eq!(meta.hops as usize, expected_hops);
    assert_eq!(meta.attempts as usize, expected_hops);
    assert!(meta.unreachable.is_empty());
    assert_eq!(owners, ring.lookup(1, b"walk").await?);
    ring.shutdown().await
}

#[tokio::test]
async fn test_hop_budget_exhausted() -> Result<()> {
    let ring = chain_ring(16, 4).await;
    let (entry, _) = far_entry(&ring, b"walk");

    let err = ring.lookup_via(&entry, 1, b"walk").await.unwrap_err();
    assert!(matches!(err, Error::RoutingExhausted(4)));
    // entering next to the key still works within the budget
    assert_eq!(ring.lookup(1, b"walk").await?.len(), 1);
    ring.shutdown().await
}

/// Two vnodes whose successor pointers loop: 10 -> 20 -> 30(=10) -> 20 -> ...
fn routing_cycle() -> Result<Arc<LocalVnode>> {
    let transport = Arc::new(LocalTransport::isolated());
    let new_vnode = |id: u32| {
        Arc::new(LocalVnode::new(
            Vnode::new(Did::from(id), "host-a"),
            1,
            transport.clone(),
            DelegateSender::default(),
        ))
    };
    let a = new_vnode(10);
    let b = new_vnode(20);
    transport.register(a.vnode(), a.clone())?;
    transport.register(b.vnode(), b.clone())?;

    // b points at 30, which is served by a
    let alias = Vnode::new(Did::from(30), "host-a");
    transport.register(&alias, a.clone())?;
    a.successors().update(b.vnode().clone())?;
    b.successors().update(alias)?;
    Ok(a)
}

#[tokio::test]
async fn test_routing_cycle_terminates() -> Result<()> {
    let a = routing_cycle()?;
    let mut meta = LookupMetaData::new(32);
    let err = a
        .find_successors(1, &Did::from(100), &mut meta)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RoutingExhausted(32)));
    assert_eq!(meta.hops, 32);
    Ok(())
}

#[tokio::test]
async fn test_routing_cycle_at_default_budget() -> Result<()> {
    let a = routing_cycle()?;
    let mut meta = LookupMetaData::new(DEFAULT_LOOKUP_HOP_BUDGET);
    let err = a
        .find_successors(1, &Did::from(100), &mut meta)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RoutingExhausted(DEFAULT_LOOKUP_HOP_BUDGET)));
    assert_eq!(meta.hops, DEFAULT_LOOKUP_HOP_BUDGET);
    Ok(())
}

#[tokio::test]
async fn test_long_walk_within_default_budget() -> Result<()> {
    let ring = chain_ring(600, DEFAULT_LOOKUP_HOP_BUDGET).await;
    let (entry, expected_hops) = far_entry(&ring, b"walk");

    let (owners, meta) = ring.lookup_via(&entry, 1, b"walk").await?;
    assert_eq!(meta.hops as usize, expected_hops);
    assert_eq!(owners, ring.lookup(1, b"walk").await?);
    ring.shutdown().await
}

#[tokio::test]
async fn test_unreachable_successor_reported() -> Result<()> {
    let ring = chain_ring(4, 1024).await;
    let vs = ring.vnodes();
    // vs[1] dies without telling anyone
    ring.transport().deregister(vs[1].vnode())?;

    // keys owned by vs[2] have to pass vs[1] when entering at vs[0]
    let mut meta = LookupMetaData::new(8);
    let key = vs[2].id().clone();
    let err = vs[0].find_successors(1, &key, &mut meta).await.unwrap_err();
    assert!(matches!(err, Error::RoutingFailed(_)));
    assert_eq!(meta.unreachable, vec![vs[1].vnode().clone()]);
    assert_eq!(meta.hops, 0);
    Ok(())
}
