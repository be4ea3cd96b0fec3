//! # Execution Overlay
//!
//! Block execution never writes the state store directly. It writes an
//! [`OverlayDb`]: a read-through view over the committed state carrying
//! an in-memory write-set. Reads see overlay writes first and fall back
//! to the backing store; the write-set only reaches disk if the whole
//! block commits.
//!
//! On top of the overlay sits the per-transaction [`ExecCache`]: a
//! second scratch layer the engine writes during one transaction.
//! Success merges it down into the overlay; failure resets it, so an
//! aborted transaction contributes nothing to the block's write-set.

use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::hash::{sha256, Hash};
use crate::crypto::multisig::Address;

use super::common::{split_storage_key, StoreError};
use super::state_store::StateStore;

/// Block-scoped overlay: committed state plus this block's writes.
pub struct OverlayDb<'a> {
    backing: &'a StateStore,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> OverlayDb<'a> {
    /// An empty overlay over the committed state.
    pub fn new(backing: &'a StateStore) -> Self {
        Self {
            backing,
            writes: BTreeMap::new(),
        }
    }

    /// Read through: overlay writes shadow the backing store, and a
    /// staged delete shadows a stored value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.backing.get(key),
        }
    }

    /// Stage a write.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// The staged write-set, key order.
    pub fn write_set(&self) -> &BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        &self.writes
    }

    /// Consume the overlay, yielding the write-set for the state batch.
    pub fn into_write_set(self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        self.writes
    }

    /// Deterministic digest of the staged write-set: the change hash
    /// appended to the state merkle chain. BTreeMap iteration is key
    /// order, so two nodes computing this over the same writes agree.
    pub fn change_hash(&self) -> Hash {
        sha256(&bincode::serialize(&self.writes).unwrap_or_default())
    }

    /// Merged view of all live `(key, value)` pairs under a prefix:
    /// committed entries overlaid with staged writes, deletes removed,
    /// key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backing.scan_prefix(prefix)?.into_iter().collect();
        for (key, value) in self.writes.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// The distinct `(contract, account)` pairs touched by storage-tag
    /// writes, canonical order.
    pub fn touched_accounts(&self) -> Vec<(Address, Address)> {
        let set: BTreeSet<(Address, Address)> = self
            .writes
            .keys()
            .filter_map(|key| split_storage_key(key))
            .collect();
        set.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// ExecCache
// ---------------------------------------------------------------------------

/// Per-transaction scratch layer over an [`OverlayDb`].
#[derive(Default)]
pub struct ExecCache {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl ExecCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read through: cache, then overlay, then committed state.
    pub fn get(&self, overlay: &OverlayDb<'_>, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => overlay.get(key),
        }
    }

    /// Stage a write for the current transaction.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Stage a delete for the current transaction.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// The transaction succeeded: fold its writes into the block overlay
    /// and leave the cache empty for the next transaction.
    pub fn commit_into(&mut self, overlay: &mut OverlayDb<'_>) {
        for (key, value) in std::mem::take(&mut self.writes) {
            match value {
                Some(v) => overlay.put(key, v),
                None => overlay.delete(key),
            }
        }
    }

    /// The transaction failed: drop its writes.
    pub fn reset(&mut self) {
        self.writes.clear();
    }
}
