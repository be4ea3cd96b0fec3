//! # Layer2 Store
//!
//! Verified layer2 state anchors, one per base-chain height. Unlike the
//! other three sub-stores this one writes directly: an anchor is fully
//! validated before it gets here, it participates in no cross-store
//! commit protocol, and losing one to a crash only means the operator
//! resubmits it.

use std::path::Path;

use crate::types::Layer2State;

use super::common::{decode, encode, height_key, open_db, StoreError};

const TREE_ANCHORS: &str = "anchors";
const TREE_META: &str = "meta";

const KEY_LATEST: &[u8] = b"latest";

/// Sled-backed layer2 anchor store. One per ledger, under `<data>/layer2`.
pub struct Layer2Store {
    db: sled::Db,
    anchors: sled::Tree,
    meta: sled::Tree,
}

impl Layer2Store {
    /// Open (or create) the layer2 store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = open_db(path)?;
        Ok(Self {
            anchors: db.open_tree(TREE_ANCHORS)?,
            meta: db.open_tree(TREE_META)?,
            db,
        })
    }

    /// Store a verified anchor and advance the latest-height marker if it
    /// moved forward. Re-storing a height overwrites in place.
    pub fn put(&self, anchor: &Layer2State) -> Result<(), StoreError> {
        let bytes = encode(anchor)?;
        self.anchors.insert(height_key(anchor.height), bytes)?;
        if self.latest_height()?.map_or(true, |h| anchor.height > h) {
            self.meta
                .insert(KEY_LATEST, &anchor.height.to_be_bytes())?;
        }
        self.db.flush()?;
        Ok(())
    }

    /// The anchor bound to one height.
    pub fn get(&self, height: u64) -> Result<Option<Layer2State>, StoreError> {
        match self.anchors.get(height_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The highest height with a stored anchor.
    pub fn latest_height(&self) -> Result<Option<u64>, StoreError> {
        match self.meta.get(KEY_LATEST)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Codec("malformed latest height".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Flush everything to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
