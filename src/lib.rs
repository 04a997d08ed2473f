//! Crate root: public surface and module map for the set-reconciliation
//! engine.
//!
//! This module is the single canonical entry point for downstream users of
//! the library. It re-exports the pieces most callers need — the field
//! type, the element set, the prefix tree, and the peer lifecycle — and
//! otherwise just wires up the submodules.
//!
//! ## Invariants
//!
//! - **Field.** All reconciliation arithmetic happens in `Zp`, integers mod
//!   a fixed prime carried alongside every value (§2). The default modulus
//!   is [`zp::p_sks`], matching the historical SKS keyserver network; other
//!   fixed primes are available for interoperability testing.
//! - **Wire compatibility.** Two peers can only reconcile if `bitquantum`
//!   and `mbar` match exactly; this is checked at the `Config` handshake
//!   ([`protocol::ProtocolError::IncompatiblePeer`]) before any tree data is
//!   exchanged.
//! - **Single-writer tree.** A [`ptree::PrefixTree`] is owned exclusively by
//!   its [`peer::Peer`]'s serializer task; all mutation and all
//!   reconciliation sessions are funneled through that one command queue.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Integers mod a fixed prime, the field every reconciliation computes in.
pub mod zp;
/// Sets of `Zp` elements keyed by their wire-canonical decimal string.
pub mod zset;
/// Fixed-length bitstrings, used as ptree prefixes and fingerprint keys.
pub mod bitstring;
/// Polynomials over `Zp`.
pub mod poly;
/// Dense matrices over `Zp` and Gauss-Jordan reduction.
pub mod matrix;
/// Rational-function interpolation from sampled quotient values.
pub mod interpolate;
/// Polynomial factorization and the numerator/denominator-to-element-sets step.
pub mod factor;
/// The reconciliation wire protocol's message framing and handshake config.
pub mod wire;
/// Byte-keyed key/value storage abstraction, with an in-memory reference backend.
pub mod storage;
/// Peer settings, loadable from TOML.
pub mod config;
/// The prefix tree indexing a peer's element set by fingerprint.
pub mod ptree;
/// The two-sided recursive-descent reconciliation protocol.
pub mod protocol;
/// Peer lifecycle: a single command queue serializing tree access and sessions.
pub mod peer;

pub use bitstring::Bitstring;
pub use config::PeerSettings;
pub use peer::{Peer, PeerError, PeerHandle, PartnerSelector, RoundRobinSelector, Transport};
pub use protocol::ProtocolError;
pub use ptree::PrefixTree;
pub use storage::{InMemoryStore, StorageAdapter};
pub use wire::ConfigMsg;
pub use zp::Zp;
pub use zset::ZSet;
