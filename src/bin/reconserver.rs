//! Minimal reconciliation server: listens for incoming peer connections,
//! gossips with a fixed partner list on an interval, and logs every
//! recovered element set.
//!
//! Flags (all optional):
//!   --listen <addr>       address to bind (default 127.0.0.1:11371)
//!   --config <path>       TOML file with `PeerSettings` (default: built-in)
//!   --partner <addr>      a gossip partner; repeatable
//!   --gossip-interval-ms  how often to dial a partner (default 5000)

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use setrecon::config::PeerSettings;
use setrecon::peer::{gossip_once, Peer, RoundRobinSelector};
use setrecon::storage::InMemoryStore;
use setrecon::wire::ConfigMsg;
use setrecon::zp::p_sks;
use setrecon::PrefixTree;
use tokio::net::TcpListener;
use tracing::{error, info};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn parse_flag_all(args: &[String], key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            if let Some(v) = it.next() {
                out.push(v.clone());
            }
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "reconserver=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();

    let listen_addr: SocketAddr = parse_flag(&args, "--listen")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 11371)));

    let settings = match parse_flag(&args, "--config") {
        Some(path) => PeerSettings::from_file(&path)
            .map_err(|e| anyhow::anyhow!("loading config {path}: {e}"))?,
        None => PeerSettings::default(),
    };

    let partners: Vec<SocketAddr> = parse_flag_all(&args, "--partner")
        .into_iter()
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                error!(partner = %s, error = %e, "ignoring unparseable --partner");
                None
            }
        })
        .collect();

    let gossip_interval = parse_flag(&args, "--gossip-interval-ms")
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(5000));

    let p = p_sks();
    let tree = PrefixTree::new(InMemoryStore::new(), p.clone(), settings)
        .map_err(|e| anyhow::anyhow!("opening prefix tree: {e}"))?;

    let local_cfg = ConfigMsg {
        version: env!("CARGO_PKG_VERSION").to_string(),
        http_port: listen_addr.port() as u32,
        bitquantum: settings.bitquantum,
        mbar: settings.mbar,
        filters: String::new(),
    };

    let (handle, mut recover_rx) = Peer::spawn(
        tree,
        settings,
        local_cfg.clone(),
        p.clone(),
        settings.mbar as usize * 4,
        Duration::from_secs(30),
        64,
        64,
    );

    tokio::spawn(async move {
        while let Some(set) = recover_rx.recv().await {
            info!(count = set.len(), "reconciliation recovered new elements");
        }
    });

    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "listening for reconciliation peers");

    {
        let accept_handle = handle.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        info!(peer = %peer_addr, "accepted reconciliation connection");
                        let h = accept_handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = h.accept(stream).await {
                                error!(peer = %peer_addr, error = %e, "responder session failed");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        });
    }

    if partners.is_empty() {
        info!("no --partner configured; running accept-only");
    } else {
        let selector = Arc::new(RoundRobinSelector::new(partners));
        let gossip_handle = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gossip_interval);
            loop {
                ticker.tick().await;
                match gossip_once(&gossip_handle, selector.as_ref()).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "gossip round failed"),
                }
            }
        });
    }

    std::future::pending::<()>().await;
    Ok(())
}
