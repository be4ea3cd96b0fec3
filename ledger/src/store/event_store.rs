//! # Event Store
//!
//! Per-transaction execution notifications, queryable by transaction
//! hash and by height. Committed *between* the block store and the state
//! store: re-saving the same height's events during crash recovery is
//! idempotent, which is exactly why it goes before the state store in
//! the commit order.

use parking_lot::Mutex;
use std::path::Path;

use crate::crypto::hash::Hash;
use crate::types::ExecNotify;

use super::common::{decode, encode, height_key, open_db, StoreError};

const TREE_NOTIFY: &str = "notify";
const TREE_HEIGHTS: &str = "heights";
const TREE_META: &str = "meta";

const KEY_CURRENT: &[u8] = b"current";

struct PendingBatch {
    notify: sled::Batch,
    heights: sled::Batch,
    meta: sled::Batch,
}

/// Sled-backed event store. One per ledger, under `<data>/ledgerevent`.
pub struct EventStore {
    db: sled::Db,
    notify: sled::Tree,
    heights: sled::Tree,
    meta: sled::Tree,
    pending: Mutex<Option<PendingBatch>>,
}

impl EventStore {
    /// Open (or create) the event store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = open_db(path)?;
        Ok(Self {
            notify: db.open_tree(TREE_NOTIFY)?,
            heights: db.open_tree(TREE_HEIGHTS)?,
            meta: db.open_tree(TREE_META)?,
            db,
            pending: Mutex::new(None),
        })
    }

    /// The last block pointer this store committed: `(height, hash)`.
    pub fn current_block(&self) -> Result<Option<(u64, Hash)>, StoreError> {
        match self.meta.get(KEY_CURRENT)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The execution notification for one transaction.
    pub fn notify_by_tx(&self, tx_hash: &Hash) -> Result<Option<ExecNotify>, StoreError> {
        match self.notify.get(tx_hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All notifications for one height, block order.
    pub fn notify_at_height(&self, height: u64) -> Result<Vec<ExecNotify>, StoreError> {
        let hashes: Vec<Hash> = match self.heights.get(height_key(height))? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            match self.notify_by_tx(hash)? {
                Some(n) => out.push(n),
                None => {
                    return Err(StoreError::NotFound(format!(
                        "notification for tx {hash} listed at height {height}"
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Open a staging batch.
    pub fn begin_batch(&self) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(StoreError::BatchProtocol("event store batch already open"));
        }
        *pending = Some(PendingBatch {
            notify: sled::Batch::default(),
            heights: sled::Batch::default(),
            meta: sled::Batch::default(),
        });
        Ok(())
    }

    /// Stage one height's notifications and advance this store's current
    /// block pointer.
    pub fn stage_block_notify(
        &self,
        height: u64,
        block_hash: Hash,
        notify: &[ExecNotify],
    ) -> Result<(), StoreError> {
        let hashes: Vec<Hash> = notify.iter().map(|n| n.tx_hash).collect();
        let hashes_bytes = encode(&hashes)?;
        let current_bytes = encode(&(height, block_hash))?;
        let mut encoded = Vec::with_capacity(notify.len());
        for n in notify {
            encoded.push((n.tx_hash, encode(n)?));
        }
        let mut pending = self.pending.lock();
        let batch = pending
            .as_mut()
            .ok_or(StoreError::BatchProtocol("no event store batch open"))?;
        for (hash, bytes) in encoded {
            batch.notify.insert(hash.as_bytes().as_slice(), bytes);
        }
        batch.heights.insert(&height_key(height), hashes_bytes);
        batch.meta.insert(KEY_CURRENT, current_bytes);
        Ok(())
    }

    /// Atomically apply the staged batch and flush.
    pub fn commit_batch(&self) -> Result<(), StoreError> {
        let batch = self
            .pending
            .lock()
            .take()
            .ok_or(StoreError::BatchProtocol("no event store batch to commit"))?;
        self.notify.apply_batch(batch.notify)?;
        self.heights.apply_batch(batch.heights)?;
        self.meta.apply_batch(batch.meta)?;
        self.db.flush()?;
        Ok(())
    }

    /// Drop a staged batch without applying it.
    pub fn discard_batch(&self) {
        *self.pending.lock() = None;
    }

    /// Remove every record. Used when initialization finds leftovers
    /// from an earlier aborted genesis attempt.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        if self.pending.lock().is_some() {
            return Err(StoreError::BatchProtocol("cannot clear with a batch open"));
        }
        self.notify.clear()?;
        self.heights.clear()?;
        self.meta.clear()?;
        self.db.flush()?;
        Ok(())
    }

    /// Flush everything to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
