//! End-to-end reconciliation scenarios driven through the full `Peer`
//! command queue rather than the bare protocol functions — two peers, each
//! owning its own `PrefixTree`, joined by an in-process duplex transport.

use std::time::Duration;

use setrecon::config::PeerSettings;
use setrecon::peer::Peer;
use setrecon::storage::InMemoryStore;
use setrecon::wire::ConfigMsg;
use setrecon::zp::{p_sks, Zp};
use setrecon::PrefixTree;
use tokio::io::duplex;

fn cfg(settings: PeerSettings) -> ConfigMsg {
    ConfigMsg {
        version: "0.1.0".to_string(),
        http_port: 11371,
        bitquantum: settings.bitquantum,
        mbar: settings.mbar,
        filters: String::new(),
    }
}

#[tokio::test]
async fn peers_recover_a_small_symmetric_difference() {
    let p = p_sks();
    let settings = PeerSettings::default();

    let tree_a = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
    let (handle_a, mut recover_a) =
        Peer::spawn(tree_a, settings, cfg(settings), p.clone(), 8, Duration::from_secs(5), 16, 16);
    handle_a.insert(Zp::from_u64(&p, 11)).await.unwrap();
    handle_a.insert(Zp::from_u64(&p, 22)).await.unwrap();
    handle_a.insert(Zp::from_u64(&p, 33)).await.unwrap();

    let tree_b = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
    let (handle_b, mut recover_b) =
        Peer::spawn(tree_b, settings, cfg(settings), p.clone(), 8, Duration::from_secs(5), 16, 16);
    handle_b.insert(Zp::from_u64(&p, 11)).await.unwrap();
    handle_b.insert(Zp::from_u64(&p, 22)).await.unwrap();
    handle_b.insert(Zp::from_u64(&p, 44)).await.unwrap();

    let (stream_a, stream_b) = duplex(64 * 1024);
    let (res_a, res_b) = tokio::join!(handle_a.accept(stream_a), handle_b.initiate_recon(stream_b));
    res_a.expect("responder session should succeed");
    res_b.expect("initiator session should succeed");

    let a_learned = recover_a.recv().await.expect("A should publish a recovered set");
    assert!(a_learned.contains(&Zp::from_u64(&p, 44)));
    assert!(!a_learned.contains(&Zp::from_u64(&p, 11)));

    let b_learned = recover_b.recv().await.expect("B should publish a recovered set");
    assert!(b_learned.contains(&Zp::from_u64(&p, 33)));
    assert!(!b_learned.contains(&Zp::from_u64(&p, 22)));

    handle_a.shutdown().await;
    handle_b.shutdown().await;
}

#[tokio::test]
async fn peers_recover_a_large_one_sided_difference_via_recursive_descent() {
    let p = p_sks();
    let settings = PeerSettings::default();

    let tree_a = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
    let (handle_a, mut recover_a) =
        Peer::spawn(tree_a, settings, cfg(settings), p.clone(), 16, Duration::from_secs(5), 32, 32);
    let tree_b = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
    let (handle_b, mut recover_b) =
        Peer::spawn(tree_b, settings, cfg(settings), p.clone(), 16, Duration::from_secs(5), 32, 32);

    // Shared bulk of common elements, large enough to force several splits.
    for i in 0u64..200 {
        let z = Zp::from_u64(&p, 1_000_003 * (i + 1));
        handle_a.insert(z.clone()).await.unwrap();
        handle_b.insert(z).await.unwrap();
    }
    // A has a few elements B lacks.
    for i in 0u64..3 {
        handle_a.insert(Zp::from_u64(&p, 97_000_001 + i)).await.unwrap();
    }

    let (stream_a, stream_b) = duplex(256 * 1024);
    let (res_a, res_b) = tokio::join!(handle_a.accept(stream_a), handle_b.initiate_recon(stream_b));
    res_a.expect("responder session should succeed");
    res_b.expect("initiator session should succeed");

    let b_learned = recover_b.recv().await.expect("B should learn A's extra elements");
    for i in 0u64..3 {
        assert!(b_learned.contains(&Zp::from_u64(&p, 97_000_001 + i)));
    }

    assert!(recover_a.try_recv().is_err(), "A has nothing new to learn from B");

    handle_a.shutdown().await;
    handle_b.shutdown().await;
}

#[tokio::test]
async fn mismatched_bitquantum_aborts_the_session() {
    let p = p_sks();
    let settings_a = PeerSettings::default();
    let settings_b = PeerSettings { bitquantum: 3, ..PeerSettings::default() };

    let tree_a = PrefixTree::new(InMemoryStore::new(), p.clone(), settings_a).unwrap();
    let (handle_a, _recover_a) =
        Peer::spawn(tree_a, settings_a, cfg(settings_a), p.clone(), 8, Duration::from_secs(5), 16, 16);
    let tree_b = PrefixTree::new(InMemoryStore::new(), p.clone(), settings_b).unwrap();
    let (handle_b, _recover_b) =
        Peer::spawn(tree_b, settings_b, cfg(settings_b), p.clone(), 8, Duration::from_secs(5), 16, 16);

    let (stream_a, stream_b) = duplex(16 * 1024);
    let (res_a, res_b) = tokio::join!(handle_a.accept(stream_a), handle_b.initiate_recon(stream_b));
    assert!(res_a.is_err());
    assert!(res_b.is_err());

    handle_a.shutdown().await;
    handle_b.shutdown().await;
}
