use std::sync::Arc;

use super::converged;
use super::create_ring;
use super::join_ring;
use super::ring_order;
use super::stabilize_until_converged;
use crate::error::Result;
use crate::transport::LocalTransport;
use crate::transport::Transport;

fn fake_network() -> Arc<dyn Transport> {
    Arc::new(LocalTransport::fake_network(None, None))
}

#[tokio::test]
async fn test_stabilization_once() -> Result<()> {
    let transport = fake_network();
    let a = create_ring(&transport, "host-a", 1, 2).await;
    let b = join_ring(&transport, "host-b", "host-a", 1, 2).await;

    let va = a.vnodes()[0].clone();
    let vb = b.vnodes()[0].clone();
    // b learned a on join and told it during the fast round
    assert_eq!(vb.successors().head()?, va.vnode().clone());
    assert_eq!(va.predecessor()?, Some(vb.vnode().clone()));

    // a only learns its successor by stabilizing
    assert_eq!(va.successors().head()?, va.vnode().clone());
    a.stabilize().await?;
    assert_eq!(va.successors().head()?, vb.vnode().clone());
    assert_eq!(vb.predecessor()?, Some(va.vnode().clone()));
    assert!(converged(&[&a, &b])?);

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn test_graceful_leave() -> Result<()> {
    let transport = fake_network();
    let a = create_ring(&transport, "host-a", 2, 3).await;
    let b = join_ring(&transport, "host-b", "host-a", 2, 3).await;
    stabilize_until_converged(&[&a, &b], 20).await?;

    b.leave().await?;
    // successors of the leaving vnodes forgot them right away
    for v in a.vnodes() {
        for gone in b.local_vnodes() {
            assert_ne!(v.predecessor()?, Some(gone));
        }
    }
    stabilize_until_converged(&[&a], 10).await?;
    a.shutdown().await
}

#[tokio::test]
async fn test_crashed_host_is_dropped() -> Result<()> {
    let transport = fake_network();
    let a = create_ring(&transport, "host-a", 3, 3).await;
    let b = join_ring(&transport, "host-b", "host-a", 2, 3).await;
    let c = join_ring(&transport, "host-c", "host-a", 2, 3).await;
    stabilize_until_converged(&[&a, &b, &c], 40).await?;
    assert_eq!(ring_order(&[&a, &b, &c]).len(), 7);

    // no goodbye, peers only notice failed pings
    b.shutdown().await?;
    let rounds = stabilize_until_converged(&[&a, &c], 20).await?;
    assert!(rounds > 0);
    for r in [&a, &c] {
        for v in r.vnodes() {
            for gone in b.local_vnodes() {
                assert!(!v.successors().contains(&gone)?);
            }
        }
    }
    a.shutdown().await?;
    c.shutdown().await
}

#[tokio::test]
async fn test_survivors_reconverge_after_crash_with_short_lists() -> Result<()> {
    // vnode ids depend on host names, vary them to hit vnodes whose whole list dies
    for round in 0..4 {
        let transport = fake_network();
        let a = create_ring(&transport, &format!("host-a{round}"), 3, 2).await;
        let b = join_ring(&transport, &format!("host-b{round}"), &format!("host-a{round}"), 3, 2).await;
        stabilize_until_converged(&[&a, &b], 40).await?;

        b.shutdown().await?;
        stabilize_until_converged(&[&a], 20).await?;
        let gone = b.local_vnodes();
        for key in [b"x".as_slice(), b"y", b"z"] {
            let owners = a.lookup(2, key).await?;
            assert!(owners.iter().all(|o| !gone.contains(o)));
        }
        a.shutdown().await?;
    }
    Ok(())
}
