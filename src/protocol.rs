//! The two-sided recursive-descent reconciliation protocol (§4.8).
//!
//! One connection, two roles: the side that accepted it runs
//! [`accept_session`] (the "responder"), driving a `requestQ`/`bottomQ`
//! pipeline that walks the local ptree and pulls prefixes from the remote;
//! the side that dialed runs [`initiate_session`] (the "initiator"),
//! answering those requests against its own tree by interpolation. The
//! message reader for each side runs as its own task so the state machine
//! can distinguish "no reply yet" from "blocked waiting for a reply" per
//! §4.8 step 3 — the channel's `try_recv`/`recv` split stands in for
//! "non-blockingly peek" vs. "block-receive".

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::bitstring::Bitstring;
use crate::config::PeerSettings;
use crate::factor::{reconcile, FactorError, ReconcileOutcome};
use crate::ptree::{PTreeError, PrefixTree};
use crate::storage::StorageAdapter;
use crate::wire::{read_msg, read_verdict, write_msg, write_verdict, ConfigMsg, Msg, WireError};
use crate::zp::Zp;
use crate::zset::ZSet;

/// Errors from a reconciliation session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("prefix tree error: {0}")]
    PTree(#[from] PTreeError),
    #[error("factoring error: {0}")]
    Factor(#[from] FactorError),
    #[error("incompatible peer: {reason}")]
    IncompatiblePeer { reason: String },
    #[error("no local node at the requested prefix")]
    ReconRqstNotFound,
    #[error("unexpected message, expected {expected}")]
    UnexpectedMessage { expected: &'static str },
    #[error("peer connection timed out waiting for a message")]
    Timeout,
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("peer reported SyncFail at a leaf node")]
    SyncFailAtLeaf,
}

/// An outstanding responder request: awaiting a reply, or a marker for
/// "the pipeline was flushed here" (§4.8).
enum BottomEntry {
    Bottom(Bitstring),
    FlushEnded,
}

/// Send both sides' `Config`, then exchange pass/fail verdicts (§6). A
/// `bitquantum`/`mbar` mismatch is a hard abort on both ends.
async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    local: &ConfigMsg,
    settings: &PeerSettings,
    p: &Arc<BigUint>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_msg(writer, &Msg::Config(local.clone())).await?;
    let peer_cfg = match read_msg(reader, p).await? {
        Msg::Config(cfg) => cfg,
        _ => return Err(ProtocolError::UnexpectedMessage { expected: "Config" }),
    };
    let compatible = peer_cfg.bitquantum == settings.bitquantum && peer_cfg.mbar == settings.mbar;
    if compatible {
        write_verdict(writer, "passed").await?;
    } else {
        write_verdict(writer, "failed: bitquantum/mbar mismatch").await?;
    }
    let peer_verdict = read_verdict(reader).await?;
    if !compatible || peer_verdict != "passed" {
        return Err(ProtocolError::IncompatiblePeer { reason: "incompatible peer".to_string() });
    }
    Ok(())
}

fn spawn_reader<R>(mut reader: R, p: Arc<BigUint>) -> mpsc::Receiver<Result<Msg, WireError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            let msg = read_msg(&mut reader, &p).await;
            let is_err = msg.is_err();
            if tx.send(msg).await.is_err() || is_err {
                break;
            }
        }
    });
    rx
}

/// Request-selection rule (§4.8): small or leaf nodes get a full dump,
/// everything else gets a poly request.
async fn send_request<S, W>(
    writer: &mut W,
    tree: &PrefixTree<S>,
    prefix: &Bitstring,
) -> Result<(), ProtocolError>
where
    S: StorageAdapter,
    W: AsyncWrite + Unpin,
{
    let node = tree.node(prefix)?;
    let msg = if node.is_leaf() || node.size() < tree.mbar() as usize {
        Msg::RqstFull { prefix: prefix.clone(), elements: node.elements.clone() }
    } else {
        Msg::RqstPoly { prefix: prefix.clone(), size: node.num_elements as u32, samples: node.svalues.clone() }
    };
    write_msg(writer, &msg).await?;
    Ok(())
}

async fn handle_reply<S, W>(
    msg: Msg,
    prefix: &Bitstring,
    tree: &PrefixTree<S>,
    writer: &mut W,
    request_q: &mut VecDeque<Bitstring>,
    recovered: &mut ZSet,
) -> Result<(), ProtocolError>
where
    S: StorageAdapter,
    W: AsyncWrite + Unpin,
{
    match msg {
        Msg::SyncFail => {
            let node = tree.node(prefix)?;
            if node.is_leaf() {
                return Err(ProtocolError::SyncFailAtLeaf);
            }
            let bq = tree.bitquantum() as usize;
            for idx in &node.child_keys {
                request_q.push_back(prefix.extend_with_index(bq, *idx));
            }
            Ok(())
        }
        Msg::Elements(s) => {
            for z in s.iter() {
                recovered.add(z.clone());
            }
            Ok(())
        }
        Msg::FullElements(remote) => {
            let node = tree.node(prefix)?;
            let local = ZSet::from_iter(node.elements.iter().cloned());
            let local_diff = local.difference(&remote);
            let remote_diff = remote.difference(&local);
            write_msg(writer, &Msg::Elements(local_diff)).await?;
            for z in remote_diff.iter() {
                recovered.add(z.clone());
            }
            Ok(())
        }
        _ => Err(ProtocolError::UnexpectedMessage { expected: "SyncFail|Elements|FullElements" }),
    }
}

/// The responder's recursive-descent loop (§4.8): drives `requestQ` against
/// the local tree, pipelines up to `max_outstanding` unanswered requests,
/// and returns the recovered remote-only elements on normal termination.
async fn responder_loop<S, W>(
    mut reader_rx: mpsc::Receiver<Result<Msg, WireError>>,
    mut writer: W,
    tree: &PrefixTree<S>,
    max_outstanding: usize,
    read_timeout: Duration,
) -> Result<ZSet, ProtocolError>
where
    S: StorageAdapter,
    W: AsyncWrite + Unpin,
{
    let mut request_q: VecDeque<Bitstring> = VecDeque::new();
    request_q.push_back(Bitstring::new(0));
    let mut bottom_q: VecDeque<BottomEntry> = VecDeque::new();
    let mut flushing = false;
    let mut recovered = ZSet::new();

    loop {
        if bottom_q.is_empty() {
            match request_q.pop_front() {
                Some(prefix) => {
                    send_request(&mut writer, tree, &prefix).await?;
                    bottom_q.push_back(BottomEntry::Bottom(prefix));
                }
                None => break,
            }
            continue;
        }

        if matches!(bottom_q.front(), Some(BottomEntry::FlushEnded)) {
            bottom_q.pop_front();
            flushing = false;
            continue;
        }

        match reader_rx.try_recv() {
            Ok(msg) => {
                let prefix = match bottom_q.pop_front() {
                    Some(BottomEntry::Bottom(p)) => p,
                    _ => unreachable!("head checked to be Bottom above"),
                };
                handle_reply(msg?, &prefix, tree, &mut writer, &mut request_q, &mut recovered).await?;
            }
            Err(mpsc::error::TryRecvError::Disconnected) => return Err(ProtocolError::ConnectionClosed),
            Err(mpsc::error::TryRecvError::Empty) => {
                if bottom_q.len() > max_outstanding || request_q.is_empty() {
                    if !flushing {
                        write_msg(&mut writer, &Msg::Flush).await?;
                        bottom_q.push_back(BottomEntry::FlushEnded);
                        flushing = true;
                    } else {
                        let msg = match tokio::time::timeout(read_timeout, reader_rx.recv()).await {
                            Ok(Some(m)) => m,
                            Ok(None) => return Err(ProtocolError::ConnectionClosed),
                            Err(_) => return Err(ProtocolError::Timeout),
                        };
                        let prefix = match bottom_q.pop_front() {
                            Some(BottomEntry::Bottom(p)) => p,
                            _ => unreachable!("head checked to be Bottom above"),
                        };
                        handle_reply(msg?, &prefix, tree, &mut writer, &mut request_q, &mut recovered).await?;
                    }
                } else {
                    let prefix = request_q.pop_front().expect("checked non-empty above");
                    send_request(&mut writer, tree, &prefix).await?;
                    bottom_q.push_back(BottomEntry::Bottom(prefix));
                }
            }
        }
    }
    write_msg(&mut writer, &Msg::Done).await?;
    Ok(recovered)
}

/// The initiator's request-answering loop (§4.8): reconciles every incoming
/// `RqstPoly`/`RqstFull` against the local tree and replies accordingly.
async fn initiator_loop<S, W>(
    mut reader_rx: mpsc::Receiver<Result<Msg, WireError>>,
    mut writer: W,
    tree: &PrefixTree<S>,
    rng: &mut impl RngCore,
) -> Result<ZSet, ProtocolError>
where
    S: StorageAdapter,
    W: AsyncWrite + Unpin,
{
    let mut recovered = ZSet::new();
    loop {
        let msg = match reader_rx.recv().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => return Err(ProtocolError::Wire(e)),
            None => return Err(ProtocolError::ConnectionClosed),
        };
        match msg {
            Msg::Done => break,
            Msg::Flush => continue,
            Msg::Elements(s) => {
                for z in s.iter() {
                    recovered.add(z.clone());
                }
            }
            Msg::RqstPoly { prefix, size: remote_size, samples } => {
                let node = tree.node(&prefix).map_err(|_| ProtocolError::ReconRqstNotFound)?;
                let values: Vec<Zp> = samples.iter().zip(node.svalues.iter()).map(|(r, l)| r.div(l)).collect();
                let points = tree.points().to_vec();
                let deg_diff = remote_size as i64 - node.num_elements as i64;
                match reconcile(&values, &points, deg_diff, rng) {
                    Ok(ReconcileOutcome::Recovered(num_set, denom_set)) => {
                        write_msg(&mut writer, &Msg::Elements(num_set)).await?;
                        for z in denom_set.iter() {
                            recovered.add(z.clone());
                        }
                    }
                    Ok(ReconcileOutcome::LowMBar) => {
                        if node.is_leaf() || node.size() < tree.mbar() as usize {
                            let elements = ZSet::from_iter(node.elements.iter().cloned());
                            write_msg(&mut writer, &Msg::FullElements(elements)).await?;
                        } else {
                            write_msg(&mut writer, &Msg::SyncFail).await?;
                        }
                    }
                    Err(e) => return Err(ProtocolError::Factor(e)),
                }
            }
            Msg::RqstFull { prefix, elements } => {
                let node = tree.node(&prefix).map_err(|_| ProtocolError::ReconRqstNotFound)?;
                let remote = ZSet::from_iter(elements);
                let local = ZSet::from_iter(node.elements.iter().cloned());
                let local_diff = local.difference(&remote);
                let remote_diff = remote.difference(&local);
                write_msg(&mut writer, &Msg::Elements(local_diff)).await?;
                for z in remote_diff.iter() {
                    recovered.add(z.clone());
                }
            }
            _ => {
                return Err(ProtocolError::UnexpectedMessage {
                    expected: "RqstPoly|RqstFull|Elements|Done|Flush",
                })
            }
        }
    }
    Ok(recovered)
}

/// Run a full responder session over `stream`: config handshake, then the
/// recursive-descent pull against `tree`. Returns the set of elements
/// present on the remote peer but not locally.
pub async fn accept_session<S, RW>(
    stream: RW,
    tree: &PrefixTree<S>,
    local_cfg: ConfigMsg,
    settings: &PeerSettings,
    max_outstanding: usize,
    read_timeout: Duration,
    p: Arc<BigUint>,
) -> Result<ZSet, ProtocolError>
where
    S: StorageAdapter,
    RW: crate::peer::Transport,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    handshake(&mut reader, &mut writer, &local_cfg, settings, &p).await?;
    let rx = spawn_reader(reader, p);
    responder_loop(rx, writer, tree, max_outstanding, read_timeout).await
}

/// Run a full initiator session over `stream`: config handshake, then answer
/// the peer's requests against `tree`. Returns the set of elements present
/// locally but not on the remote peer.
pub async fn initiate_session<S, RW>(
    stream: RW,
    tree: &PrefixTree<S>,
    local_cfg: ConfigMsg,
    settings: &PeerSettings,
    p: Arc<BigUint>,
    rng: &mut impl RngCore,
) -> Result<ZSet, ProtocolError>
where
    S: StorageAdapter,
    RW: crate::peer::Transport,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    handshake(&mut reader, &mut writer, &local_cfg, settings, &p).await?;
    let rx = spawn_reader(reader, p);
    initiator_loop(rx, writer, tree, rng).await
}
