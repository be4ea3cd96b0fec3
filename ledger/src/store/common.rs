//! Shared storage plumbing: the store error type, key layout, and
//! bincode codec helpers used by every sub-store.
//!
//! ## Key layout
//!
//! The state store's raw key space is partitioned by a one-byte tag:
//!
//! ```text
//! 0x02  contract code      [tag][contract 20]                = 21 bytes
//! 0x05  contract storage   [tag][contract 20][account 20]    = 41 bytes
//! 0x07  chain parameters   [tag][utf-8 name]
//! ```
//!
//! The fixed widths matter: account-level change detection slices the
//! contract and account straight out of a 41-byte storage key without a
//! secondary index.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::crypto::multisig::Address;

/// Errors raised by the sled-backed sub-stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying sled database failed.
    #[error("storage backend error: {0}")]
    Sled(#[from] sled::Error),

    /// A stored value failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// A record the protocol requires was absent.
    #[error("missing record: {0}")]
    NotFound(String),

    /// A staging call arrived with no batch open, or a second batch was
    /// opened over an existing one.
    #[error("batch protocol violation: {0}")]
    BatchProtocol(&'static str),
}

// ---------------------------------------------------------------------------
// Key tags & builders
// ---------------------------------------------------------------------------

/// Tag for contract code records.
pub const TAG_CONTRACT: u8 = 0x02;

/// Tag for contract storage records.
pub const TAG_STORAGE: u8 = 0x05;

/// Tag for chain parameter records.
pub const TAG_PARAM: u8 = 0x07;

/// Big-endian height key, so sled's lexicographic order is height order.
pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Key of a contract code record.
pub fn contract_key(contract: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(TAG_CONTRACT);
    key.extend_from_slice(contract.as_bytes());
    key
}

/// Key of one account's record under a contract.
pub fn storage_key(contract: &Address, account: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(TAG_STORAGE);
    key.extend_from_slice(contract.as_bytes());
    key.extend_from_slice(account.as_bytes());
    key
}

/// Key of a named chain parameter.
pub fn param_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(TAG_PARAM);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Split a 41-byte storage key back into its contract and account.
/// `None` for keys of any other shape.
pub fn split_storage_key(key: &[u8]) -> Option<(Address, Address)> {
    if key.len() != 41 || key[0] != TAG_STORAGE {
        return None;
    }
    let mut contract = [0u8; 20];
    let mut account = [0u8; 20];
    contract.copy_from_slice(&key[1..21]);
    account.copy_from_slice(&key[21..41]);
    Some((Address(contract), Address(account)))
}

// ---------------------------------------------------------------------------
// Codec & db helpers
// ---------------------------------------------------------------------------

/// Bincode-encode a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Decode a stored bincode value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Open (or create) a sled database at the given path.
pub fn open_db(path: &Path) -> Result<sled::Db, StoreError> {
    Ok(sled::open(path)?)
}
