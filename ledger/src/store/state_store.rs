//! # State Store
//!
//! Durable home of everything derived from execution:
//!
//! - the raw key-value state (contract code, contract storage, chain
//!   parameters, partitioned by key tag);
//! - the two merkle accumulators (block root chain, state root chain);
//! - the per-height state roots and change leaves;
//! - the per-height account state hashes and their root, for layer2
//!   inclusion proofs;
//! - the bookkeeper state record;
//! - its own current block pointer, which recovery compares against the
//!   block store's.
//!
//! The accumulators live in memory as the committed copies; a staged
//! batch carries *pending* copies that absorb appends and only replace
//! the committed ones when the batch lands. A discarded batch therefore
//! leaves both the disk and the in-memory commitments untouched.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::crypto::hash::Hash;
use crate::crypto::merkle::MerkleAccumulator;
use crate::types::BookkeeperState;

use super::common::{decode, encode, height_key, open_db, StoreError};

const TREE_KV: &str = "kv";
const TREE_META: &str = "meta";
const TREE_ROOTS: &str = "roots";
const TREE_LEAVES: &str = "leaves";
const TREE_ACCOUNT_ROOTS: &str = "account_roots";
const TREE_ACCOUNT_STATES: &str = "account_states";

const KEY_CURRENT: &[u8] = b"current";
const KEY_BLOCK_ACC: &[u8] = b"block_acc";
const KEY_STATE_ACC: &[u8] = b"state_acc";
const KEY_BOOKKEEPERS: &[u8] = b"bookkeepers";

struct Committed {
    block_acc: MerkleAccumulator,
    state_acc: MerkleAccumulator,
}

struct PendingBatch {
    kv: sled::Batch,
    meta: sled::Batch,
    roots: sled::Batch,
    leaves: sled::Batch,
    account_roots: sled::Batch,
    account_states: sled::Batch,
    block_acc: MerkleAccumulator,
    state_acc: MerkleAccumulator,
}

/// Sled-backed state store. One per ledger, under `<data>/states`.
pub struct StateStore {
    db: sled::Db,
    kv: sled::Tree,
    meta: sled::Tree,
    roots: sled::Tree,
    leaves: sled::Tree,
    account_roots: sled::Tree,
    account_states: sled::Tree,
    committed: Mutex<Committed>,
    pending: Mutex<Option<PendingBatch>>,
}

impl StateStore {
    /// Open (or create) the state store at `path`, loading the committed
    /// accumulators.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = open_db(path)?;
        let meta = db.open_tree(TREE_META)?;
        let block_acc = match meta.get(KEY_BLOCK_ACC)? {
            Some(bytes) => decode(&bytes)?,
            None => MerkleAccumulator::new(),
        };
        let state_acc = match meta.get(KEY_STATE_ACC)? {
            Some(bytes) => decode(&bytes)?,
            None => MerkleAccumulator::new(),
        };
        Ok(Self {
            kv: db.open_tree(TREE_KV)?,
            roots: db.open_tree(TREE_ROOTS)?,
            leaves: db.open_tree(TREE_LEAVES)?,
            account_roots: db.open_tree(TREE_ACCOUNT_ROOTS)?,
            account_states: db.open_tree(TREE_ACCOUNT_STATES)?,
            meta,
            db,
            committed: Mutex::new(Committed {
                block_acc,
                state_acc,
            }),
            pending: Mutex::new(None),
        })
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// The last block pointer this store committed: `(height, hash)`.
    pub fn current_block(&self) -> Result<Option<(u64, Hash)>, StoreError> {
        match self.meta.get(KEY_CURRENT)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw state lookup by tagged key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.kv.get(key)?.map(|v| v.to_vec()))
    }

    /// All live `(key, value)` pairs under a key prefix, key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut entries = Vec::new();
        for item in self.kv.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Root the block chain accumulator would have after appending the
    /// given transaction roots, without mutating anything.
    pub fn block_root_with(&self, tx_roots: &[Hash]) -> Hash {
        self.committed.lock().block_acc.root_with_new_leaves(tx_roots)
    }

    /// Root the state chain accumulator would have after appending the
    /// given change hashes, without mutating anything.
    pub fn state_root_with(&self, change_hashes: &[Hash]) -> Hash {
        self.committed
            .lock()
            .state_acc
            .root_with_new_leaves(change_hashes)
    }

    /// Number of leaves in the committed state chain.
    pub fn state_chain_size(&self) -> u64 {
        self.committed.lock().state_acc.size()
    }

    /// The committed state root for one height.
    pub fn state_root_at(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        match self.roots.get(height_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Change leaves for heights in `[from, to]`, height order. Heights
    /// with no leaf (at or below the checkpoint) are simply absent.
    pub fn change_leaves(&self, from: u64, to: u64) -> Result<Vec<Hash>, StoreError> {
        let mut out = Vec::new();
        for item in self.leaves.range(height_key(from)..=height_key(to)) {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Account state hashes recorded for one height, canonical order.
    pub fn account_states_at(&self, height: u64) -> Result<Option<Vec<Hash>>, StoreError> {
        match self.account_states.get(height_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Root over the account state hashes recorded for one height.
    pub fn account_state_root_at(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        match self.account_roots.get(height_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The persisted bookkeeper state.
    pub fn bookkeeper_state(&self) -> Result<Option<BookkeeperState>, StoreError> {
        match self.meta.get(KEY_BOOKKEEPERS)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------
    // Staged batch
    // -----------------------------------------------------------------

    /// Open a staging batch. The pending accumulators start as copies of
    /// the committed ones.
    pub fn begin_batch(&self) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(StoreError::BatchProtocol("state store batch already open"));
        }
        let committed = self.committed.lock();
        *pending = Some(PendingBatch {
            kv: sled::Batch::default(),
            meta: sled::Batch::default(),
            roots: sled::Batch::default(),
            leaves: sled::Batch::default(),
            account_roots: sled::Batch::default(),
            account_states: sled::Batch::default(),
            block_acc: committed.block_acc.clone(),
            state_acc: committed.state_acc.clone(),
        });
        Ok(())
    }

    fn with_pending<R>(
        &self,
        f: impl FnOnce(&mut PendingBatch) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(batch) => f(batch),
            None => Err(StoreError::BatchProtocol("no state store batch open")),
        }
    }

    /// Stage an execution write-set: `Some` inserts, `None` deletes.
    pub fn stage_write_set(
        &self,
        write_set: &BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<(), StoreError> {
        self.with_pending(|p| {
            for (key, value) in write_set {
                match value {
                    Some(v) => p.kv.insert(key.as_slice(), v.as_slice()),
                    None => p.kv.remove(key.as_slice()),
                }
            }
            Ok(())
        })
    }

    /// Stage this store's current block pointer.
    pub fn stage_current(&self, height: u64, hash: Hash) -> Result<(), StoreError> {
        let bytes = encode(&(height, hash))?;
        self.with_pending(|p| {
            p.meta.insert(KEY_CURRENT, bytes);
            Ok(())
        })
    }

    /// Stage the state root recorded for one height.
    pub fn stage_state_root(&self, height: u64, root: Hash) -> Result<(), StoreError> {
        let bytes = encode(&root)?;
        self.with_pending(|p| {
            p.roots.insert(&height_key(height), bytes);
            Ok(())
        })
    }

    /// Append one transaction root to the pending block chain.
    pub fn append_block_leaf(&self, tx_root: Hash) -> Result<(), StoreError> {
        self.with_pending(|p| {
            p.block_acc.append(tx_root);
            Ok(())
        })
    }

    /// Append one change hash to the pending state chain and stage its
    /// per-height leaf record.
    pub fn append_state_leaf(&self, height: u64, change_hash: Hash) -> Result<(), StoreError> {
        let bytes = encode(&change_hash)?;
        self.with_pending(|p| {
            p.state_acc.append(change_hash);
            p.leaves.insert(&height_key(height), bytes);
            Ok(())
        })
    }

    /// Stage the account state hashes and their root for one height.
    pub fn stage_account_states(
        &self,
        height: u64,
        root: Hash,
        states: &[Hash],
    ) -> Result<(), StoreError> {
        let root_bytes = encode(&root)?;
        let states_bytes = encode(&states.to_vec())?;
        self.with_pending(|p| {
            p.account_roots.insert(&height_key(height), root_bytes);
            p.account_states.insert(&height_key(height), states_bytes);
            Ok(())
        })
    }

    /// Stage the bookkeeper state record.
    pub fn stage_bookkeeper_state(&self, state: &BookkeeperState) -> Result<(), StoreError> {
        let bytes = encode(state)?;
        self.with_pending(|p| {
            p.meta.insert(KEY_BOOKKEEPERS, bytes);
            Ok(())
        })
    }

    /// Atomically apply the staged batch, flush, and promote the pending
    /// accumulators to committed.
    pub fn commit_batch(&self) -> Result<(), StoreError> {
        let mut batch = self
            .pending
            .lock()
            .take()
            .ok_or(StoreError::BatchProtocol("no state store batch to commit"))?;
        batch.meta.insert(KEY_BLOCK_ACC, encode(&batch.block_acc)?);
        batch.meta.insert(KEY_STATE_ACC, encode(&batch.state_acc)?);

        self.kv.apply_batch(batch.kv)?;
        self.roots.apply_batch(batch.roots)?;
        self.leaves.apply_batch(batch.leaves)?;
        self.account_roots.apply_batch(batch.account_roots)?;
        self.account_states.apply_batch(batch.account_states)?;
        self.meta.apply_batch(batch.meta)?;
        self.db.flush()?;

        let mut committed = self.committed.lock();
        committed.block_acc = batch.block_acc;
        committed.state_acc = batch.state_acc;
        Ok(())
    }

    /// Drop a staged batch. The committed accumulators are untouched.
    pub fn discard_batch(&self) {
        *self.pending.lock() = None;
    }

    /// Remove every record and reset both accumulators. Used when
    /// initialization finds leftovers from an earlier aborted genesis
    /// attempt.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        if self.pending.lock().is_some() {
            return Err(StoreError::BatchProtocol("cannot clear with a batch open"));
        }
        self.kv.clear()?;
        self.meta.clear()?;
        self.roots.clear()?;
        self.leaves.clear()?;
        self.account_roots.clear()?;
        self.account_states.clear()?;
        self.db.flush()?;
        let mut committed = self.committed.lock();
        committed.block_acc = MerkleAccumulator::new();
        committed.state_acc = MerkleAccumulator::new();
        Ok(())
    }

    /// Flush everything to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
