//! The storage adapter contract (§6): a byte-keyed KV interface the ptree
//! persists node records and a duplicate-detection namespace through, plus
//! one in-memory reference implementation.
//!
//! Concrete backends (sled, RocksDB, a legacy SKS-style adapter, ...) live
//! behind this same five-operation trait; this crate ships only the
//! reference one, sufficient for tests and the example binary.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::trace;

/// Errors from a storage adapter.
///
/// The reference in-memory adapter never fails; this exists for real
/// backends (disk I/O, a network KV store) that can.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend i/o error: {0}")]
    Io(String),
}

/// The byte-keyed KV contract the ptree persists through.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &[u8], val: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    fn has(&self, key: &[u8]) -> Result<bool, StorageError>;
}

/// A `Mutex<BTreeMap>`-backed reference implementation of [`StorageAdapter`].
///
/// Deterministic iteration order isn't load-bearing here (the trait has no
/// iteration method), but `BTreeMap` keeps the debug `Display` of a dumped
/// store stable across runs, which is convenient when comparing fixtures.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { data: Mutex::new(BTreeMap::new()) }
    }

    /// Number of stored keys. Test/diagnostic helper, not part of the trait.
    pub fn len(&self) -> usize {
        self.data.lock().expect("InMemoryStore mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageAdapter for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.lock().expect("InMemoryStore mutex poisoned").get(key).cloned())
    }

    fn put(&self, key: &[u8], val: &[u8]) -> Result<(), StorageError> {
        trace!(key_len = key.len(), val_len = val.len(), "storage put");
        self.data
            .lock()
            .expect("InMemoryStore mutex poisoned")
            .insert(key.to_vec(), val.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        trace!(key_len = key.len(), "storage delete");
        self.data.lock().expect("InMemoryStore mutex poisoned").remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.data.lock().expect("InMemoryStore mutex poisoned").contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_has_delete_round_trip() {
        let s = InMemoryStore::new();
        assert!(!s.has(b"k").unwrap());
        s.put(b"k", b"v").unwrap();
        assert!(s.has(b"k").unwrap());
        assert_eq!(s.get(b"k").unwrap(), Some(b"v".to_vec()));
        s.delete(b"k").unwrap();
        assert!(!s.has(b"k").unwrap());
        assert_eq!(s.get(b"k").unwrap(), None);
    }
}
