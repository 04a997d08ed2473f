//! The prefix tree (ptree): a persistent trie indexed by bit-reversed
//! fingerprints, carrying per-node interpolation sample values (§4.7).
//!
//! Nodes live in an in-memory arena (`HashMap<Bitstring, PrefixNode>`) keyed
//! by prefix rather than as a pointer graph with parent back-links — per the
//! design notes' resolution of the "back-pointer from child to tree
//! configuration" source idiom, a node only ever needs read-only access to
//! tree-wide config (`bitquantum`, `num_samples`), which callers pass
//! explicitly instead of embedding a cyclic reference.
//!
//! Every mutating operation writes its touched nodes through the storage
//! adapter before returning, and [`PrefixTree::new`] reconstructs the full
//! tree from storage on open (no node is ever orphaned: a child's storage
//! key is always derivable from its parent's key plus its child index, so
//! no `scan` operation is needed to rehydrate).

use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigUint;
use tracing::debug;

use crate::bitstring::Bitstring;
use crate::config::PeerSettings;
use crate::storage::{StorageAdapter, StorageError};
use crate::zp::Zp;

/// Errors from ptree operations.
#[derive(Debug, thiserror::Error)]
pub enum PTreeError {
    #[error("element already present in the tree")]
    DuplicateElement,
    #[error("element not present in the tree")]
    ElementNotFound,
    #[error("no node found at the given prefix")]
    PNodeNotFound,
    #[error("storage adapter error: {0}")]
    Storage(#[from] StorageError),
    #[error("decoded node record is corrupt: {0}")]
    Corrupt(String),
}

/// A trie node identified by its bit-prefix (§3).
#[derive(Clone, Debug)]
pub struct PrefixNode {
    pub key: Bitstring,
    pub num_elements: usize,
    pub svalues: Vec<Zp>,
    /// Present child indices, `0..2^bitquantum`; empty iff this is a leaf.
    pub child_keys: Vec<u32>,
    /// Fingerprints stored directly at this node; non-empty only at leaves.
    pub elements: Vec<Zp>,
}

impl PrefixNode {
    fn new_leaf(key: Bitstring, num_samples: usize, p: &Arc<BigUint>) -> Self {
        Self {
            key,
            num_elements: 0,
            svalues: vec![Zp::one(p); num_samples],
            child_keys: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child_keys.is_empty()
    }

    pub fn size(&self) -> usize {
        self.num_elements
    }
}

/// The fixed interpolation points `1, -1, 2, -2, ...` (§4.7), picked once at
/// tree construction.
fn compute_points(p: &Arc<BigUint>, num_samples: usize) -> Vec<Zp> {
    (0..num_samples)
        .map(|i| {
            let magnitude = Zp::from_u64(p, (i / 2 + 1) as u64);
            if i % 2 == 0 {
                magnitude
            } else {
                magnitude.neg()
            }
        })
        .collect()
}

/// A fingerprint's ptree key: the bit-reversal of its wire bytes (§6).
fn fingerprint_key(p: &Arc<BigUint>, z: &Zp) -> Bitstring {
    debug_assert!(z.modulus() == p, "fingerprint_key: Zp belongs to a different field");
    Bitstring::from_fingerprint(&z.to_wire_bytes()).reverse_bits()
}

fn node_storage_key(key: &Bitstring) -> Vec<u8> {
    let mut out = b"node:".to_vec();
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key.bytes());
    out
}

fn elem_storage_key(z: &Zp) -> Vec<u8> {
    let mut out = b"elem:".to_vec();
    out.extend(z.to_wire_bytes());
    out
}

fn encode_node(node: &PrefixNode) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(node.num_elements as u32).to_be_bytes());
    buf.extend_from_slice(&(node.svalues.len() as u32).to_be_bytes());
    for s in &node.svalues {
        buf.extend(s.to_wire_bytes());
    }
    buf.extend_from_slice(&(node.child_keys.len() as u32).to_be_bytes());
    for c in &node.child_keys {
        buf.extend_from_slice(&c.to_be_bytes());
    }
    buf.extend_from_slice(&(node.elements.len() as u32).to_be_bytes());
    for e in &node.elements {
        buf.extend(e.to_wire_bytes());
    }
    buf
}

fn decode_node(bytes: &[u8], p: &Arc<BigUint>, key: Bitstring) -> Result<PrefixNode, PTreeError> {
    let zp_len = Zp::wire_len(p);
    let mut pos = 0usize;
    let mut read_u32 = |pos: &mut usize| -> Result<u32, PTreeError> {
        let slice = bytes
            .get(*pos..*pos + 4)
            .ok_or_else(|| PTreeError::Corrupt("truncated node record".into()))?;
        *pos += 4;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    };
    let num_elements = read_u32(&mut pos)? as usize;
    let n_svalues = read_u32(&mut pos)? as usize;
    let mut svalues = Vec::with_capacity(n_svalues);
    for _ in 0..n_svalues {
        let slice = bytes
            .get(pos..pos + zp_len)
            .ok_or_else(|| PTreeError::Corrupt("truncated svalue".into()))?;
        svalues.push(Zp::from_wire_bytes(p, slice).map_err(|e| PTreeError::Corrupt(e.to_string()))?);
        pos += zp_len;
    }
    let n_children = read_u32(&mut pos)? as usize;
    let mut child_keys = Vec::with_capacity(n_children);
    for _ in 0..n_children {
        child_keys.push(read_u32(&mut pos)?);
    }
    let n_elements = read_u32(&mut pos)? as usize;
    let mut elements = Vec::with_capacity(n_elements);
    for _ in 0..n_elements {
        let slice = bytes
            .get(pos..pos + zp_len)
            .ok_or_else(|| PTreeError::Corrupt("truncated element".into()))?;
        elements.push(Zp::from_wire_bytes(p, slice).map_err(|e| PTreeError::Corrupt(e.to_string()))?);
        pos += zp_len;
    }
    Ok(PrefixNode { key, num_elements, svalues, child_keys, elements })
}

/// The persistent prefix tree.
pub struct PrefixTree<S: StorageAdapter> {
    nodes: HashMap<Bitstring, PrefixNode>,
    storage: S,
    p: Arc<BigUint>,
    settings: PeerSettings,
    points: Vec<Zp>,
}

impl<S: StorageAdapter> PrefixTree<S> {
    /// Open (or, if storage is empty, create) a tree over `storage`.
    pub fn new(storage: S, p: Arc<BigUint>, settings: PeerSettings) -> Result<Self, PTreeError> {
        let points = compute_points(&p, settings.num_samples());
        let mut tree = Self { nodes: HashMap::new(), storage, p, settings, points };
        let root_key = Bitstring::new(0);
        if tree.storage.has(&node_storage_key(&root_key))? {
            tree.load_subtree(root_key)?;
        } else {
            let root = PrefixNode::new_leaf(root_key.clone(), settings.num_samples(), &tree.p);
            tree.nodes.insert(root_key.clone(), root);
            tree.persist_node(&root_key)?;
        }
        Ok(tree)
    }

    fn load_subtree(&mut self, key: Bitstring) -> Result<(), PTreeError> {
        let bytes = self
            .storage
            .get(&node_storage_key(&key))?
            .ok_or_else(|| PTreeError::Corrupt(format!("missing node record at {key}")))?;
        let node = decode_node(&bytes, &self.p, key.clone())?;
        let child_keys = node.child_keys.clone();
        self.nodes.insert(key.clone(), node);
        let bq = self.settings.bitquantum as usize;
        for idx in child_keys {
            self.load_subtree(key.extend_with_index(bq, idx))?;
        }
        Ok(())
    }

    fn persist_node(&self, key: &Bitstring) -> Result<(), PTreeError> {
        let node = self
            .nodes
            .get(key)
            .expect("persist_node called with a key not present in the in-memory arena");
        self.storage.put(&node_storage_key(key), &encode_node(node))?;
        Ok(())
    }

    pub fn root(&self) -> &PrefixNode {
        self.nodes.get(&Bitstring::new(0)).expect("root always present")
    }

    pub fn node(&self, prefix: &Bitstring) -> Result<&PrefixNode, PTreeError> {
        self.nodes.get(prefix).ok_or(PTreeError::PNodeNotFound)
    }

    pub fn points(&self) -> &[Zp] {
        &self.points
    }

    pub fn split_threshold(&self) -> usize {
        self.settings.split_threshold()
    }

    pub fn join_threshold(&self) -> usize {
        self.settings.join_threshold()
    }

    pub fn bitquantum(&self) -> u32 {
        self.settings.bitquantum
    }

    pub fn mbar(&self) -> u32 {
        self.settings.mbar
    }

    pub fn num_samples(&self) -> usize {
        self.settings.num_samples()
    }

    /// Walk from the root to the leaf that would hold `fk`, returning the
    /// path of visited keys (root first, leaf last).
    fn path_to_leaf(&self, fk: &Bitstring) -> Vec<Bitstring> {
        let bq = self.settings.bitquantum as usize;
        let mut path = Vec::new();
        let mut cur = Bitstring::new(0);
        loop {
            path.push(cur.clone());
            if self.nodes.get(&cur).expect("node in path must exist").is_leaf() {
                break;
            }
            let idx = fk.child_index_at(cur.len(), bq);
            cur = cur.extend_with_index(bq, idx);
        }
        path
    }

    /// Insert `z`. Fails with [`PTreeError::DuplicateElement`] if already present.
    pub fn insert(&mut self, z: Zp) -> Result<(), PTreeError> {
        let elem_key = elem_storage_key(&z);
        if self.storage.has(&elem_key)? {
            return Err(PTreeError::DuplicateElement);
        }
        let fk = fingerprint_key(&self.p, &z);
        let path = self.path_to_leaf(&fk);

        for key in &path {
            let node = self.nodes.get_mut(key).expect("path node must exist");
            node.num_elements += 1;
            for (i, pt) in self.points.iter().enumerate() {
                node.svalues[i] = node.svalues[i].mul(&pt.sub(&z));
            }
        }
        let leaf_key = path.last().expect("path always non-empty").clone();
        self.nodes.get_mut(&leaf_key).unwrap().elements.push(z.clone());
        self.storage.put(&elem_key, &[])?;
        for key in &path {
            self.persist_node(key)?;
        }

        if self.nodes[&leaf_key].elements.len() > self.split_threshold() {
            self.split(leaf_key)?;
        }
        debug!(fingerprint = %z, "ptree insert complete");
        Ok(())
    }

    /// Remove `z`. Fails with [`PTreeError::ElementNotFound`] if absent.
    pub fn remove(&mut self, z: &Zp) -> Result<(), PTreeError> {
        let elem_key = elem_storage_key(z);
        if !self.storage.has(&elem_key)? {
            return Err(PTreeError::ElementNotFound);
        }
        let fk = fingerprint_key(&self.p, z);
        let path = self.path_to_leaf(&fk);
        let leaf_key = path.last().expect("path always non-empty").clone();

        {
            let leaf = self.nodes.get_mut(&leaf_key).unwrap();
            let pos = leaf.elements.iter().position(|e| e == z).expect(
                "duplicate-detection namespace reports this element present but the leaf doesn't hold it",
            );
            leaf.elements.remove(pos);
        }
        for key in &path {
            let node = self.nodes.get_mut(key).expect("path node must exist");
            node.num_elements -= 1;
            for (i, pt) in self.points.iter().enumerate() {
                let mask = pt.sub(z).inv();
                node.svalues[i] = node.svalues[i].mul(&mask);
            }
        }
        self.storage.delete(&elem_key)?;
        for key in &path {
            self.persist_node(key)?;
        }

        // Bottom-up join check, skipping the leaf itself (a leaf is never joined).
        for key in path.iter().rev().skip(1) {
            let should_join = {
                let node = self.nodes.get(key).unwrap();
                !node.is_leaf() && node.num_elements <= self.join_threshold()
            };
            if should_join {
                self.join(key.clone())?;
            }
        }
        debug!(fingerprint = %z, "ptree remove complete");
        Ok(())
    }

    /// Split an over-capacity leaf into `2^bitquantum` fresh leaf children.
    fn split(&mut self, key: Bitstring) -> Result<(), PTreeError> {
        let bq = self.settings.bitquantum as usize;
        let fanout = 1usize << bq;
        let num_samples = self.num_samples();

        let elements = std::mem::take(&mut self.nodes.get_mut(&key).unwrap().elements);
        self.nodes.get_mut(&key).unwrap().child_keys = (0..fanout as u32).collect();
        for idx in 0..fanout as u32 {
            let child_key = key.extend_with_index(bq, idx);
            self.nodes.insert(child_key.clone(), PrefixNode::new_leaf(child_key, num_samples, &self.p));
        }
        for z in &elements {
            let fk = fingerprint_key(&self.p, z);
            let idx = fk.child_index_at(key.len(), bq);
            let child_key = key.extend_with_index(bq, idx);
            let child = self.nodes.get_mut(&child_key).unwrap();
            child.elements.push(z.clone());
            child.num_elements += 1;
            for (i, pt) in self.points.iter().enumerate() {
                child.svalues[i] = child.svalues[i].mul(&pt.sub(z));
            }
        }
        for idx in 0..fanout as u32 {
            self.persist_node(&key.extend_with_index(bq, idx))?;
        }
        self.persist_node(&key)?;
        debug!(prefix = %key, fanout, "ptree leaf split");
        Ok(())
    }

    /// Collapse an interior node whose subtree has shrunk to `join_threshold`
    /// or below back into a leaf, pulling in every descendant's elements.
    fn join(&mut self, key: Bitstring) -> Result<(), PTreeError> {
        let child_idxs = self.nodes.get(&key).unwrap().child_keys.clone();
        let bq = self.settings.bitquantum as usize;
        let mut collected = Vec::new();
        for idx in child_idxs {
            let child_key = key.extend_with_index(bq, idx);
            self.collect_and_delete(&child_key, &mut collected)?;
        }
        let node = self.nodes.get_mut(&key).unwrap();
        node.elements = collected;
        node.child_keys.clear();
        self.persist_node(&key)?;
        debug!(prefix = %key, "ptree subtree join");
        Ok(())
    }

    fn collect_and_delete(&mut self, key: &Bitstring, out: &mut Vec<Zp>) -> Result<(), PTreeError> {
        let (is_leaf, elements, child_idxs) = {
            let n = self.nodes.get(key).expect("descendant node must exist");
            (n.is_leaf(), n.elements.clone(), n.child_keys.clone())
        };
        if is_leaf {
            out.extend(elements);
        } else {
            let bq = self.settings.bitquantum as usize;
            for idx in child_idxs {
                self.collect_and_delete(&key.extend_with_index(bq, idx), out)?;
            }
        }
        self.nodes.remove(key);
        self.storage.delete(&node_storage_key(key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::zp::p_sks;

    fn fresh_tree(settings: PeerSettings) -> PrefixTree<InMemoryStore> {
        PrefixTree::new(InMemoryStore::new(), p_sks(), settings).unwrap()
    }

    #[test]
    fn invariant1_fresh_root_has_unit_svalues() {
        let t = fresh_tree(PeerSettings::default());
        let p = p_sks();
        assert_eq!(t.root().num_elements, 0);
        assert!(t.root().is_leaf());
        for s in &t.root().svalues {
            assert_eq!(s, &Zp::one(&p));
        }
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut t = fresh_tree(PeerSettings::default());
        let p = p_sks();
        let z = Zp::from_u64(&p, 65537);
        t.insert(z.clone()).unwrap();
        assert!(matches!(t.insert(z).unwrap_err(), PTreeError::DuplicateElement));
    }

    #[test]
    fn remove_absent_is_rejected() {
        let mut t = fresh_tree(PeerSettings::default());
        let p = p_sks();
        let z = Zp::from_u64(&p, 65537);
        assert!(matches!(t.remove(&z).unwrap_err(), PTreeError::ElementNotFound));
    }

    #[test]
    fn s6_single_fingerprint_svalues() {
        let p = p_sks();
        let mut t = fresh_tree(PeerSettings::default());
        let z = Zp::from_decimal_str(&p, "224045810486609649306292620830306652473").unwrap();
        t.insert(z.clone()).unwrap();

        let expect_decimals = [
            "306467079064992673198834899522272784867",
            "306467079064992673198834899522272784865",
            "306467079064992673198834899522272784868",
            "306467079064992673198834899522272784864",
            "306467079064992673198834899522272784869",
            "306467079064992673198834899522272784863",
        ];
        let expect: Vec<Zp> =
            expect_decimals.iter().map(|d| Zp::from_decimal_str(&p, d).unwrap()).collect();
        assert_eq!(t.root().svalues, expect);
    }

    #[test]
    fn s5_split_join_round_trip() {
        let settings = PeerSettings::default();
        let mut t = fresh_tree(settings);
        let p = p_sks();
        let n = 4 * settings.split_threshold();
        let elems: Vec<Zp> = (0..n as u64).map(|i| Zp::from_u64(&p, 65536 + i)).collect();
        for z in &elems {
            t.insert(z.clone()).unwrap();
        }
        assert!(!t.root().is_leaf());
        for z in &elems {
            t.remove(z).unwrap();
        }
        assert!(t.root().is_leaf());
        assert_eq!(t.root().num_elements, 0);
        assert!(t.root().child_keys.is_empty());
        let p = p_sks();
        for s in &t.root().svalues {
            assert_eq!(s, &Zp::one(&p));
        }
    }

    #[test]
    fn invariant4_num_elements_matches_subtree_membership() {
        let settings = PeerSettings { mbar: 2, thresh_mult: 2, ..PeerSettings::default() };
        let mut t = fresh_tree(settings);
        let p = p_sks();
        let elems: Vec<Zp> = (0..40u64).map(|i| Zp::from_u64(&p, 1_000_003 + i)).collect();
        for z in &elems {
            t.insert(z.clone()).unwrap();
        }
        assert_eq!(t.root().num_elements, elems.len());
    }
}
