//! # Ledger Configuration & Constants
//!
//! Every consensus-relevant constant of the commitment layer lives here.
//! Changing any of these after a network has produced blocks is a hard
//! fork; changing them after mainnet is a career decision.

use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Store Versioning
// ---------------------------------------------------------------------------

/// On-disk format version of the ledger store. Written to the block store
/// after a successful genesis initialization; its presence is the marker
/// that the store has been initialized at all.
pub const SYSTEM_VERSION: u8 = 1;

/// Version tag a layer2 state anchor must carry to be accepted.
pub const LAYER2_STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Header Index
// ---------------------------------------------------------------------------

/// Number of confirmed heights accumulated in memory before the header
/// index is flushed to the block store as one chunk. Bounds write
/// amplification: one chunk write per 2000 blocks instead of one per block.
pub const HEADER_INDEX_BATCH_SIZE: u64 = 2000;

// ---------------------------------------------------------------------------
// State Hashing
// ---------------------------------------------------------------------------

/// Default state checkpoint height `T`. Below `T` the state root is the
/// zero sentinel; at `T` it is a one-time full hash over the entire state;
/// above `T` it is the incremental merkle chain of change hashes.
///
/// Zero means state hashing is anchored from genesis, which is what fresh
/// networks want. Chains migrating history from an older format set this
/// to the height where hashing was switched on.
pub const DEFAULT_STATE_CHECKPOINT_HEIGHT: u64 = 0;

// ---------------------------------------------------------------------------
// Gas Schedule
// ---------------------------------------------------------------------------

/// Gas charged for any transaction regardless of payload.
pub const GAS_TX_BASE: u64 = 500;

/// Gas charged per storage put performed by an invocation.
pub const GAS_STORAGE_PUT: u64 = 200;

/// Gas charged per storage delete performed by an invocation.
pub const GAS_STORAGE_DELETE: u64 = 100;

/// Flat gas charged for deploying a contract.
pub const GAS_CONTRACT_CREATE: u64 = 10_000;

/// Gas charged per byte of deployed contract code.
pub const GAS_DEPLOY_BYTE: u64 = 5;

/// Gas table entry names. On-chain parameter records override these by
/// name (see [`crate::exec::GasTable::refresh_from_params`]).
pub const GAS_KEY_TX_BASE: &str = "tx.base";
pub const GAS_KEY_STORAGE_PUT: &str = "storage.put";
pub const GAS_KEY_STORAGE_DELETE: &str = "storage.delete";
pub const GAS_KEY_CONTRACT_CREATE: &str = "contract.create";
pub const GAS_KEY_DEPLOY_BYTE: &str = "deploy.byte";

/// The built-in gas schedule, used as the baseline before any on-chain
/// parameter overrides are applied.
pub fn default_gas_schedule() -> BTreeMap<String, u64> {
    BTreeMap::from([
        (GAS_KEY_TX_BASE.to_string(), GAS_TX_BASE),
        (GAS_KEY_STORAGE_PUT.to_string(), GAS_STORAGE_PUT),
        (GAS_KEY_STORAGE_DELETE.to_string(), GAS_STORAGE_DELETE),
        (GAS_KEY_CONTRACT_CREATE.to_string(), GAS_CONTRACT_CREATE),
        (GAS_KEY_DEPLOY_BYTE.to_string(), GAS_DEPLOY_BYTE),
    ])
}

// ---------------------------------------------------------------------------
// Storage Layout
// ---------------------------------------------------------------------------

/// Subdirectory of the data dir holding the block store.
pub const DIR_BLOCK: &str = "block";

/// Subdirectory of the data dir holding the state store.
pub const DIR_STATE: &str = "states";

/// Subdirectory of the data dir holding the event store.
pub const DIR_EVENT: &str = "ledgerevent";

/// Subdirectory of the data dir holding the layer2 message store.
pub const DIR_LAYER2: &str = "layer2";

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`crate::LedgerStore`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// The state checkpoint height `T` for the three-phase root policy.
    pub state_checkpoint_height: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            state_checkpoint_height: DEFAULT_STATE_CHECKPOINT_HEIGHT,
        }
    }
}

impl LedgerConfig {
    /// Configuration with an explicit checkpoint height.
    pub fn with_checkpoint(height: u64) -> Self {
        Self {
            state_checkpoint_height: height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_covers_all_keys() {
        let schedule = default_gas_schedule();
        for key in [
            GAS_KEY_TX_BASE,
            GAS_KEY_STORAGE_PUT,
            GAS_KEY_STORAGE_DELETE,
            GAS_KEY_CONTRACT_CREATE,
            GAS_KEY_DEPLOY_BYTE,
        ] {
            assert!(schedule.contains_key(key), "missing gas key {key}");
        }
    }

    #[test]
    fn default_config_uses_default_checkpoint() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.state_checkpoint_height, DEFAULT_STATE_CHECKPOINT_HEIGHT);
    }
}
