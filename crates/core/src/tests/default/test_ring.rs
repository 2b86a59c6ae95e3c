use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use super::converged;
use super::create_ring;
use super::expected_owners;
use super::join_ring;
use super::ring_order;
use super::stabilize_until_converged;
use super::test_config;
use crate::dht::Delegate;
use crate::dht::Ring;
use crate::dht::Vnode;
use crate::error::Error;
use crate::error::Result;
use crate::stats::MemoryStats;
use crate::tests::setup_tracing;
use crate::transport::LocalTransport;
use crate::transport::Transport;

fn fake_network() -> Arc<dyn Transport> {
    Arc::new(LocalTransport::fake_network(None, None))
}

#[tokio::test]
async fn test_create_lone_vnode() -> Result<()> {
    let transport = fake_network();
    let ring = create_ring(&transport, "host-a", 1, 3).await;

    let v = &ring.vnodes()[0];
    assert_eq!(v.successors().head()?, v.vnode().clone());
    assert_eq!(v.predecessor()?, Some(v.vnode().clone()));
    assert!(converged(&[&ring])?);

    // every key belongs to the only vnode
    for key in [b"a".as_slice(), b"b", b"some longer key"] {
        assert_eq!(ring.lookup(1, key).await?, vec![v.vnode().clone()]);
    }
    ring.shutdown().await
}

#[tokio::test]
async fn test_create_links_local_vnodes() -> Result<()> {
    let transport = fake_network();
    let ring = create_ring(&transport, "host-a", 2, 1).await;
    let vs = ring.vnodes();

    assert!(vs[0].id() < vs[1].id());
    assert_eq!(vs[0].successors().list()?, vec![vs[1].vnode().clone()]);
    assert_eq!(vs[1].successors().list()?, vec![vs[0].vnode().clone()]);
    assert_eq!(vs[0].predecessor()?, Some(vs[1].vnode().clone()));
    assert_eq!(vs[1].predecessor()?, Some(vs[0].vnode().clone()));
    assert!(converged(&[&ring])?);
    ring.shutdown().await
}

#[tokio::test]
async fn test_join_converges_to_merged_order() -> Result<()> {
    let transport = fake_network();
    let a = create_ring(&transport, "host-a", 2, 1).await;
    let b = join_ring(&transport, "host-b", "host-a", 2, 1).await;

    stabilize_until_converged(&[&a, &b], 20).await?;

    let order = ring_order(&[&a, &b]);
    assert_eq!(order.len(), 4);
    for ring in [&a, &b] {
        for v in ring.vnodes() {
            let i = order.iter().position(|o| o.id == *v.id()).unwrap();
            assert_eq!(v.successors().head()?, order[(i + 1) % 4]);
        }
    }

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn test_lookup_cross_validation() -> Result<()> {
    let transport = fake_network();
    let a = create_ring(&transport, "host-a", 4, 3).await;
    let b = join_ring(&transport, "host-b", "host-a", 4, 3).await;
    stabilize_until_converged(&[&a, &b], 40).await?;
    let c = join_ring(&transport, "host-c", "host-b", 4, 3).await;
    stabilize_until_converged(&[&a, &b, &c], 40).await?;

    let order = ring_order(&[&a, &b, &c]);
    for i in 0..32 {
        let key = format!("key-{i}");
        let expected = expected_owners(&order, &a, key.as_bytes(), 3);
        assert_eq!(a.lookup(3, key.as_bytes()).await?, expected);
        assert_eq!(c.lookup(3, key.as_bytes()).await?, expected);
        assert_eq!(a.cross_validate(3, key.as_bytes(), &order).await?, expected);
    }

    for r in [a, b, c] {
        r.shutdown().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_cross_validation_detects_split_ring() -> Result<()> {
    let transport = fake_network();
    // two rings that never met share one network
    let a = create_ring(&transport, "host-a", 2, 2).await;
    let b = create_ring(&transport, "host-b", 2, 2).await;

    let entries: Vec<Vnode> = a.local_vnodes().into_iter().chain(b.local_vnodes()).collect();
    let mut found = false;
    for i in 0..16 {
        let key = format!("key-{i}");
        if let Err(e) = a.cross_validate(1, key.as_bytes(), &entries).await {
            assert!(matches!(e, Error::InconsistentHashing { .. }));
            found = true;
            break;
        }
    }
    assert!(found);
    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn test_lookup_rejects_bad_replication() -> Result<()> {
    let transport = fake_network();
    let ring = create_ring(&transport, "host-a", 2, 2).await;
    assert!(matches!(
        ring.lookup(0, b"k").await,
        Err(Error::InvalidReplicationFactor {
            requested: 0,
            max: 2
        })
    ));
    assert!(matches!(
        ring.lookup(3, b"k").await,
        Err(Error::InvalidReplicationFactor { .. })
    ));
    ring.shutdown().await?;
    assert!(matches!(ring.lookup(1, b"k").await, Err(Error::RingShutdown)));
    assert!(matches!(ring.shutdown().await, Err(Error::RingShutdown)));
    Ok(())
}

#[tokio::test]
async fn test_join_unknown_host_fails() {
    let transport = fake_network();
    let _a = create_ring(&transport, "host-a", 2, 2).await;
    let res = Ring::join(test_config("host-b", 2, 2), transport.clone(), "host-x").await;
    assert!(res.is_err());
    // the failed ring left nothing behind
    assert!(transport.list_vnodes("host-b").await.is_err());
}

#[tokio::test]
async fn test_lookup_cache_and_stats() -> Result<()> {
    let transport = fake_network();
    let stats = Arc::new(MemoryStats::new());
    let mut config = test_config("host-a", 4, 2);
    config.use_cache = true;
    let ring = Ring::create(config.with_stats(stats.clone()), transport.clone()).await?;

    let first = ring.lookup(2, b"cached").await?;
    let second = ring.lookup(2, b"cached").await?;
    assert_eq!(first, second);

    let summary = stats.summary();
    assert_eq!(summary.cache_misses, 1);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.lookups, 1);
    ring.shutdown().await
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Delegate for Recorder {
    fn new_predecessor(&self, local: &Vnode, new: &Vnode, _previous: Option<&Vnode>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("new_predecessor {} {}", local.host, new.host));
    }

    fn leaving(&self, local: &Vnode, _predecessor: Option<&Vnode>, _successor: &Vnode) {
        self.0.lock().unwrap().push(format!("leaving {}", local.host));
    }

    fn shutdown(&self) {
        self.0.lock().unwrap().push("shutdown".to_string());
    }
}

#[tokio::test]
async fn test_delegate_sees_joiner_and_leave() -> Result<()> {
    let transport = fake_network();
    let recorder = Arc::new(Recorder::default());
    let config = test_config("host-a", 2, 3).with_delegate(recorder.clone());
    let a = Ring::create(config, transport.clone()).await?;
    let b = join_ring(&transport, "host-b", "host-a", 2, 3).await;
    stabilize_until_converged(&[&a, &b], 20).await?;

    a.leave().await?;
    let events = recorder.events();
    assert!(events.contains(&"new_predecessor host-a host-b".to_string()));
    assert_eq!(
        events.iter().filter(|e| *e == "leaving host-a").count(),
        2
    );
    assert_eq!(events.last(), Some(&"shutdown".to_string()));
    b.shutdown().await
}

#[tokio::test]
async fn test_scheduled_stabilization_converges() -> Result<()> {
    setup_tracing();
    let transport = fake_network();
    let mut config = test_config("host-a", 2, 2);
    config.stabilize_min_ms = 5;
    config.stabilize_max_ms = 15;
    let a = Ring::create(config.clone(), transport.clone()).await?;
    config.hostname = "host-b".to_string();
    let b = Ring::join(config, transport.clone(), "host-a").await?;

    let mut ok = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if converged(&[&a, &b])? {
            ok = true;
            break;
        }
    }
    assert!(ok);
    for r in [&a, &b] {
        for v in r.vnodes() {
            assert!(v.last_stabilized()?.is_some());
        }
    }
    a.shutdown().await?;
    b.shutdown().await
}
