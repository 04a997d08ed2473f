//! Peer lifecycle (§4.9): a single command queue that serializes every
//! ptree mutation and every reconciliation session through one task, giving
//! the tree "single-threaded effective concurrency" while connection I/O
//! stays fully concurrent (§5).
//!
//! [`Peer::spawn`] starts that serializer task and hands back a cheaply
//! `Clone`-able [`PeerHandle`] plus the `RecoverChan` receiver the spec
//! describes — recovered element sets from every session, successful or
//! not, are published there as they complete.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::PeerSettings;
use crate::protocol::{accept_session, initiate_session, ProtocolError};
use crate::ptree::{PTreeError, PrefixTree};
use crate::storage::StorageAdapter;
use crate::wire::ConfigMsg;
use crate::zp::Zp;
use crate::zset::ZSet;

/// The "duplex byte stream" abstraction spec.md's scope section names —
/// blanket-implemented for anything usable as an async connection,
/// including `tokio::net::TcpStream` and `tokio::io::DuplexStream`.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

/// Errors from talking to a running [`Peer`] through its handle.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer command queue is closed (the peer has shut down)")]
    Closed,
    #[error("failed to connect to partner {addr}: {source}")]
    Connect { addr: SocketAddr, source: std::io::Error },
    #[error("tree error: {0}")]
    Tree(#[from] PTreeError),
    #[error("session error: {0}")]
    Session(#[from] ProtocolError),
}

/// The "choose a partner" gossip-scheduler callback spec.md leaves out of
/// scope; defined here only so [`gossip_once`] has something concrete to
/// call.
pub trait PartnerSelector: Send + Sync {
    fn choose(&self) -> Option<SocketAddr>;
}

/// A trivial round-robin [`PartnerSelector`] over a fixed address list.
pub struct RoundRobinSelector {
    addrs: Vec<SocketAddr>,
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs, next: AtomicUsize::new(0) }
    }
}

impl PartnerSelector for RoundRobinSelector {
    fn choose(&self) -> Option<SocketAddr> {
        if self.addrs.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.addrs.len();
        Some(self.addrs[i])
    }
}

enum PeerCommand<T: Transport> {
    Insert { z: Zp, reply: oneshot::Sender<Result<(), PTreeError>> },
    Remove { z: Zp, reply: oneshot::Sender<Result<(), PTreeError>> },
    Accept { stream: T, reply: oneshot::Sender<Result<ZSet, ProtocolError>> },
    InitiateRecon { stream: T, reply: oneshot::Sender<Result<ZSet, ProtocolError>> },
    Shutdown,
}

/// A handle to a running [`Peer`]'s command queue. Cheap to clone; every
/// clone enqueues onto the same serializer task.
#[derive(Clone)]
pub struct PeerHandle<T: Transport> {
    cmd_tx: mpsc::Sender<PeerCommand<T>>,
}

impl<T: Transport> PeerHandle<T> {
    /// Insert `z` into the peer's tree.
    pub async fn insert(&self, z: Zp) -> Result<(), PeerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PeerCommand::Insert { z, reply: tx })
            .await
            .map_err(|_| PeerError::Closed)?;
        Ok(rx.await.map_err(|_| PeerError::Closed)??)
    }

    /// Remove `z` from the peer's tree; fails if absent.
    pub async fn remove(&self, z: Zp) -> Result<(), PeerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PeerCommand::Remove { z, reply: tx })
            .await
            .map_err(|_| PeerError::Closed)?;
        Ok(rx.await.map_err(|_| PeerError::Closed)??)
    }

    /// Run a responder session over an already-accepted connection.
    pub async fn accept(&self, stream: T) -> Result<ZSet, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PeerCommand::Accept { stream, reply: tx })
            .await
            .map_err(|_| PeerError::Closed)?;
        Ok(rx.await.map_err(|_| PeerError::Closed)??)
    }

    /// Run an initiator session over a connection this side dialed.
    pub async fn initiate_recon(&self, stream: T) -> Result<ZSet, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PeerCommand::InitiateRecon { stream, reply: tx })
            .await
            .map_err(|_| PeerError::Closed)?;
        Ok(rx.await.map_err(|_| PeerError::Closed)??)
    }

    /// Stop the peer's serializer task: no further commands are processed
    /// and the `RecoverChan` receiver is closed once it drains.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(PeerCommand::Shutdown).await;
    }
}

/// Process-wide peer state: one ptree, one command queue, one gossip/serve
/// identity. Owns the `PrefixTree` exclusively — only this task ever
/// touches it, which is what makes tree access effectively single-threaded.
pub struct Peer<S: StorageAdapter, T: Transport> {
    tree: PrefixTree<S>,
    settings: PeerSettings,
    local_cfg: ConfigMsg,
    p: Arc<BigUint>,
    max_outstanding: usize,
    read_timeout: Duration,
    recover_tx: mpsc::Sender<ZSet>,
    cmd_rx: mpsc::Receiver<PeerCommand<T>>,
}

impl<S: StorageAdapter + Send + 'static, T: Transport> Peer<S, T> {
    /// Start the serializer task, returning a handle to enqueue commands
    /// and the `RecoverChan` receiver.
    pub fn spawn(
        tree: PrefixTree<S>,
        settings: PeerSettings,
        local_cfg: ConfigMsg,
        p: Arc<BigUint>,
        max_outstanding: usize,
        read_timeout: Duration,
        cmd_capacity: usize,
        recover_capacity: usize,
    ) -> (PeerHandle<T>, mpsc::Receiver<ZSet>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(cmd_capacity);
        let (recover_tx, recover_rx) = mpsc::channel(recover_capacity);
        let peer = Peer { tree, settings, local_cfg, p, max_outstanding, read_timeout, recover_tx, cmd_rx };
        tokio::spawn(peer.run());
        (PeerHandle { cmd_tx }, recover_rx)
    }

    async fn run(mut self) {
        let mut rng = StdRng::from_entropy();
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                PeerCommand::Insert { z, reply } => {
                    let r = self.tree.insert(z);
                    let _ = reply.send(r);
                }
                PeerCommand::Remove { z, reply } => {
                    let r = self.tree.remove(&z);
                    let _ = reply.send(r);
                }
                PeerCommand::Accept { stream, reply } => {
                    let r = accept_session(
                        stream,
                        &self.tree,
                        self.local_cfg.clone(),
                        &self.settings,
                        self.max_outstanding,
                        self.read_timeout,
                        self.p.clone(),
                    )
                    .await;
                    self.publish(&r).await;
                    let _ = reply.send(r);
                }
                PeerCommand::InitiateRecon { stream, reply } => {
                    let r = initiate_session(
                        stream,
                        &self.tree,
                        self.local_cfg.clone(),
                        &self.settings,
                        self.p.clone(),
                        &mut rng,
                    )
                    .await;
                    self.publish(&r).await;
                    let _ = reply.send(r);
                }
                PeerCommand::Shutdown => break,
            }
        }
    }

    async fn publish(&self, result: &Result<ZSet, ProtocolError>) {
        match result {
            Ok(set) if !set.is_empty() => {
                let _ = self.recover_tx.send(set.clone()).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "reconciliation session ended in error"),
        }
    }
}

/// Dial `selector`'s chosen partner and run an initiator session against
/// it. Returns `Ok(None)` if the selector has no partner to offer.
pub async fn gossip_once(
    handle: &PeerHandle<TcpStream>,
    selector: &dyn PartnerSelector,
) -> Result<Option<ZSet>, PeerError> {
    let Some(addr) = selector.choose() else {
        return Ok(None);
    };
    let stream = TcpStream::connect(addr).await.map_err(|source| PeerError::Connect { addr, source })?;
    handle.initiate_recon(stream).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::zp::p_sks;
    use tokio::io::duplex;

    fn test_cfg() -> ConfigMsg {
        ConfigMsg {
            version: "0.1.0".to_string(),
            http_port: 11371,
            bitquantum: 2,
            mbar: 5,
            filters: String::new(),
        }
    }

    #[tokio::test]
    async fn insert_remove_round_trip_through_the_handle() {
        let p = p_sks();
        let settings = PeerSettings::default();
        let tree = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
        let (handle, _recover_rx): (PeerHandle<tokio::io::DuplexStream>, _) =
            Peer::spawn(tree, settings, test_cfg(), p.clone(), 8, Duration::from_secs(5), 16, 16);

        let z = Zp::from_u64(&p, 65537);
        handle.insert(z.clone()).await.unwrap();
        assert!(handle.remove(z).await.is_ok());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn accept_and_initiate_sessions_publish_to_recover_chan() {
        let p = p_sks();
        let settings = PeerSettings::default();

        let tree_a = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
        let (handle_a, mut recover_a): (PeerHandle<tokio::io::DuplexStream>, _) =
            Peer::spawn(tree_a, settings, test_cfg(), p.clone(), 8, Duration::from_secs(5), 16, 16);
        handle_a.insert(Zp::from_u64(&p, 65537)).await.unwrap();
        handle_a.insert(Zp::from_u64(&p, 65539)).await.unwrap();

        let tree_b = PrefixTree::new(InMemoryStore::new(), p.clone(), settings).unwrap();
        let (handle_b, mut recover_b): (PeerHandle<tokio::io::DuplexStream>, _) =
            Peer::spawn(tree_b, settings, test_cfg(), p.clone(), 8, Duration::from_secs(5), 16, 16);
        handle_b.insert(Zp::from_u64(&p, 65537)).await.unwrap();
        handle_b.insert(Zp::from_u64(&p, 65541)).await.unwrap();

        let (stream_a, stream_b) = duplex(16 * 1024);
        let (res_a, res_b) =
            tokio::join!(handle_a.accept(stream_a), handle_b.initiate_recon(stream_b));
        res_a.unwrap();
        res_b.unwrap();

        let recovered_a = recover_a.recv().await.expect("A should have published a recovered set");
        assert!(recovered_a.contains(&Zp::from_u64(&p, 65541)));
        let recovered_b = recover_b.recv().await.expect("B should have published a recovered set");
        assert!(recovered_b.contains(&Zp::from_u64(&p, 65539)));

        handle_a.shutdown().await;
        handle_b.shutdown().await;
    }

    #[test]
    fn round_robin_selector_cycles() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let sel = RoundRobinSelector::new(vec![a, b]);
        assert_eq!(sel.choose(), Some(a));
        assert_eq!(sel.choose(), Some(b));
        assert_eq!(sel.choose(), Some(a));
    }

    #[test]
    fn round_robin_selector_empty_is_none() {
        let sel = RoundRobinSelector::new(vec![]);
        assert_eq!(sel.choose(), None);
    }
}
