//! # Block Store
//!
//! Durable home of block content, keyed by block hash, plus the three
//! records recovery depends on:
//!
//! - the **version marker**, whose presence means genesis initialization
//!   completed;
//! - the **current block pointer** `(height, hash)`, advanced as the last
//!   staged write of every block commit;
//! - the **header index chunks**, the height-to-hash mapping flushed in
//!   fixed-size runs rather than one key per block.
//!
//! All writes go through a staged batch: callers open a batch, stage
//! records, and commit, at which point every staged write lands in one
//! atomic sled apply per tree followed by a flush. Interior mutability
//! keeps the public API `&self` so the ledger core can hold one store
//! behind an `Arc` with concurrent readers.

use parking_lot::Mutex;
use std::path::Path;

use crate::config::SYSTEM_VERSION;
use crate::crypto::hash::Hash;
use crate::types::{Block, Header};

use super::common::{decode, encode, height_key, open_db, StoreError};

const TREE_BLOCKS: &str = "blocks";
const TREE_META: &str = "meta";
const TREE_HEADER_INDEX: &str = "header_index";
const TREE_TX_INDEX: &str = "tx_index";

const KEY_VERSION: &[u8] = b"version";
const KEY_CURRENT: &[u8] = b"current";

struct PendingBatch {
    blocks: sled::Batch,
    meta: sled::Batch,
    header_index: sled::Batch,
    tx_index: sled::Batch,
}

/// Sled-backed block store. One per ledger, under `<data>/block`.
pub struct BlockStore {
    db: sled::Db,
    blocks: sled::Tree,
    meta: sled::Tree,
    header_index: sled::Tree,
    tx_index: sled::Tree,
    pending: Mutex<Option<PendingBatch>>,
}

impl BlockStore {
    /// Open (or create) the block store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = open_db(path)?;
        Ok(Self {
            blocks: db.open_tree(TREE_BLOCKS)?,
            meta: db.open_tree(TREE_META)?,
            header_index: db.open_tree(TREE_HEADER_INDEX)?,
            tx_index: db.open_tree(TREE_TX_INDEX)?,
            db,
            pending: Mutex::new(None),
        })
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// The stored format version, if genesis initialization ever
    /// completed here.
    pub fn version(&self) -> Result<Option<u8>, StoreError> {
        Ok(self.meta.get(KEY_VERSION)?.map(|v| v.first().copied().unwrap_or(0)))
    }

    /// The committed tip: `(height, block hash)`.
    pub fn current_block(&self) -> Result<Option<(u64, Hash)>, StoreError> {
        match self.meta.get(KEY_CURRENT)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch a block by its hash.
    pub fn block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch just the header of a stored block.
    pub fn header(&self, hash: &Hash) -> Result<Option<Header>, StoreError> {
        Ok(self.block(hash)?.map(|b| b.header))
    }

    /// Whether a block with this hash is stored.
    pub fn contains(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(hash.as_bytes())?)
    }

    /// The height whose block carries this transaction, if indexed.
    pub fn tx_height(&self, tx_hash: &Hash) -> Result<Option<u64>, StoreError> {
        match self.tx_index.get(tx_hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the full height-to-hash index by concatenating the stored
    /// chunks in height order. `index[h]` is the hash at height `h`.
    pub fn load_header_index(&self) -> Result<Vec<Hash>, StoreError> {
        let mut index = Vec::new();
        for entry in self.header_index.iter() {
            let (key, value) = entry?;
            let start = u64::from_be_bytes(
                key.as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Codec("malformed header index key".into()))?,
            );
            if start != index.len() as u64 {
                return Err(StoreError::Codec(format!(
                    "header index chunk at {start} does not follow {}",
                    index.len()
                )));
            }
            let chunk: Vec<Hash> = decode(&value)?;
            index.extend(chunk);
        }
        Ok(index)
    }

    // -----------------------------------------------------------------
    // Staged batch
    // -----------------------------------------------------------------

    /// Open a staging batch. Errors if one is already open.
    pub fn begin_batch(&self) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(StoreError::BatchProtocol("block store batch already open"));
        }
        *pending = Some(PendingBatch {
            blocks: sled::Batch::default(),
            meta: sled::Batch::default(),
            header_index: sled::Batch::default(),
            tx_index: sled::Batch::default(),
        });
        Ok(())
    }

    fn with_pending<R>(
        &self,
        f: impl FnOnce(&mut PendingBatch) -> R,
    ) -> Result<R, StoreError> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(batch) => Ok(f(batch)),
            None => Err(StoreError::BatchProtocol("no block store batch open")),
        }
    }

    /// Stage a block's content keyed by its hash, plus a tx index entry
    /// for every transaction it carries.
    pub fn stage_block(&self, block: &Block) -> Result<(), StoreError> {
        let bytes = encode(block)?;
        let hash = block.hash();
        let height_bytes = encode(&block.height())?;
        let tx_hashes = block.tx_hashes();
        self.with_pending(|p| {
            p.blocks.insert(hash.as_bytes().as_slice(), bytes);
            for tx_hash in &tx_hashes {
                p.tx_index
                    .insert(tx_hash.as_bytes().as_slice(), height_bytes.clone());
            }
        })
    }

    /// Stage the current block pointer.
    pub fn stage_current(&self, height: u64, hash: Hash) -> Result<(), StoreError> {
        let bytes = encode(&(height, hash))?;
        self.with_pending(|p| p.meta.insert(KEY_CURRENT, bytes))
    }

    /// Stage one header index chunk starting at `start_height`.
    pub fn stage_header_index_chunk(
        &self,
        start_height: u64,
        hashes: &[Hash],
    ) -> Result<(), StoreError> {
        let bytes = encode(&hashes.to_vec())?;
        self.with_pending(|p| p.header_index.insert(&height_key(start_height), bytes))
    }

    /// Stage the format version marker. Written exactly once, as part of
    /// the genesis commit batch.
    pub fn stage_version(&self) -> Result<(), StoreError> {
        self.with_pending(|p| p.meta.insert(KEY_VERSION, &[SYSTEM_VERSION]))
    }

    /// Atomically apply the staged batch and flush.
    pub fn commit_batch(&self) -> Result<(), StoreError> {
        let batch = self
            .pending
            .lock()
            .take()
            .ok_or(StoreError::BatchProtocol("no block store batch to commit"))?;
        self.blocks.apply_batch(batch.blocks)?;
        self.meta.apply_batch(batch.meta)?;
        self.header_index.apply_batch(batch.header_index)?;
        self.tx_index.apply_batch(batch.tx_index)?;
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
        self.blocks.clear()?;
        self.meta.clear()?;
        self.header_index.clear()?;
        self.tx_index.clear()?;
        self.db.flush()?;
        Ok(())
    }

    /// Flush everything to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
