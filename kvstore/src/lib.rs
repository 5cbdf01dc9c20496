//! Ordered byte-string key-value store abstraction.
//!
//! Every chain instance — root or sub-chain — talks to its state through
//! this trait instead of a concrete database, so the sub-chain manager can
//! hand each spawned chain a [`PrefixedStore`] view over one shared backend
//! without that chain's code ever being aware it isn't the only tenant.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A single write, part of an atomically-applied [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of writes applied atomically by [`KvStore::apply_batch`]. The chain
/// processor uses this for block application: UTXO add/remove, tx index
/// entries and chain-tip pointer move together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Ordered byte-string map with prefix scan, implemented by an in-memory
/// map for tests and by `sled` for anything durable.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// Deletes every key under `prefix`. Used to wipe a deregistered
    /// sub-chain's namespace in one call.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<()> {
        let keys: Vec<Vec<u8>> = self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.apply_batch(&batch)
    }
}

/// In-memory backend. Used by unit/integration tests and by the block
/// producer's speculative-apply dry runs.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.lock().unwrap();
        let upper = prefix_upper_bound(prefix);
        let range = match &upper {
            Some(upper) => map.range((
                Bound::Included(prefix.to_vec()),
                Bound::Excluded(upper.clone()),
            )),
            None => map.range(prefix.to_vec()..),
        };
        Ok(range.map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                BatchOp::Delete(k) => {
                    map.remove(k);
                }
            }
        }
        Ok(())
    }
}

/// The smallest byte string strictly greater than every string starting
/// with `prefix`, or `None` if `prefix` is all `0xff` (no upper bound exists).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last == 0xff {
            upper.pop();
        } else {
            let len = upper.len();
            upper[len - 1] += 1;
            return Some(upper);
        }
    }
    None
}

/// Embedded-LSM backend for durable node state.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .db
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => sled_batch.insert(k.as_slice(), v.as_slice()),
                BatchOp::Delete(k) => sled_batch.remove(k.as_slice()),
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// A namespace-isolated view over a shared backend: every key is
/// transparently prefixed before hitting the inner store. Spawning a
/// sub-chain means constructing one of these over the root chain's backend
/// with `ChainID` as the prefix; deregistering it means `delete_prefix`-ing
/// that same namespace.
pub struct PrefixedStore {
    inner: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl PrefixedStore {
    #[must_use]
    pub fn new(inner: Arc<dyn KvStore>, prefix: Vec<u8>) -> Self {
        Self { inner, prefix }
    }

    fn namespaced(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    /// Deletes every key in this namespace, leaving siblings untouched.
    pub fn wipe(&self) -> Result<()> {
        self.inner.delete_prefix(&self.prefix)
    }
}

impl KvStore for PrefixedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.namespaced(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(&self.namespaced(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(&self.namespaced(key))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let full_prefix = self.namespaced(prefix);
        let stripped = self
            .inner
            .scan_prefix(&full_prefix)?
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_vec(), v))
            .collect();
        Ok(stripped)
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut namespaced_batch = WriteBatch::new();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => {
                    namespaced_batch.put(self.namespaced(k), v.clone());
                }
                BatchOp::Delete(k) => {
                    namespaced_batch.delete(self.namespaced(k));
                }
            }
        }
        self.inner.apply_batch(&namespaced_batch)
    }
}
