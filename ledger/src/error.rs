//! Error types for the ledger core.
//!
//! Four families, matching what callers are expected to do about them:
//! validation errors (reject, nothing persisted), storage errors (abort,
//! retry the whole submit), execution errors (recorded per transaction,
//! the block still commits — those never surface here), and consistency
//! errors (fatal, the store refuses further mutating operations).

use thiserror::Error;

use crate::crypto::multisig::MultisigError;
use crate::store::StoreError;

/// Errors returned by [`crate::LedgerStore`] operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A header failed validation (parent linkage, height, timestamp,
    /// bookkeeper commitment, or multisignature).
    #[error("header validation failed: {0}")]
    InvalidHeader(String),

    /// A layer2 state anchor failed validation before any mutation.
    #[error("layer2 state validation failed: {0}")]
    InvalidLayer2State(String),

    /// A block arrived more than one height ahead of the current tip.
    #[error("block height {got} does not extend current height {current}")]
    OutOfOrder {
        /// The height the block declared.
        got: u64,
        /// The current committed height.
        current: u64,
    },

    /// The recomputed rolling block root disagrees with the header.
    #[error("block root mismatch at height {height}: expected {expected}, got {got}")]
    BlockRootMismatch {
        /// Height of the offending block.
        height: u64,
        /// Root recomputed from the rolling accumulator.
        expected: String,
        /// Root the header declared.
        got: String,
    },

    /// A multisignature check failed.
    #[error(transparent)]
    Multisig(#[from] MultisigError),

    /// A sub-store failed during batch open, staging, or commit.
    /// The in-memory pointer has not advanced; the caller must retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The overlay or another piece of execution infrastructure failed.
    /// Distinct from a single transaction failing inside the engine,
    /// which is recorded in its notification and does not abort the block.
    #[error("block execution aborted: {0}")]
    ExecutionAborted(String),

    /// The store is shutting down; no further mutations are accepted.
    #[error("ledger store is closing")]
    Closing,

    /// Fatal inconsistency (genesis missing after the version marker was
    /// set, impossible recovery gap). The store refuses to serve further
    /// mutating operations.
    #[error("inconsistent ledger state: {0}")]
    Inconsistent(String),

    /// Genesis initialization failed; no partial version marker was left.
    #[error("ledger initialization failed: {0}")]
    Init(String),
}

impl LedgerError {
    /// Whether this error poisons the store (consistency class).
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Inconsistent(_))
    }
}
