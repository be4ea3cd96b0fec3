//! Gas pricing. The built-in schedule is the baseline; chain parameter
//! records stored under the `0x07` tag override entries by name, so
//! governance can reprice operations without a software release.

use std::collections::BTreeMap;

use crate::config::default_gas_schedule;
use crate::store::common::{param_key, StoreError, TAG_PARAM};
use crate::store::StateStore;

/// Prefix of gas override parameter names: `gas:<entry name>`.
const GAS_PARAM_PREFIX: &str = "gas:";

/// An immutable snapshot of the gas schedule, refreshed from chain
/// parameters at the top of each block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasTable {
    entries: BTreeMap<String, u64>,
}

impl Default for GasTable {
    fn default() -> Self {
        Self {
            entries: default_gas_schedule(),
        }
    }
}

impl GasTable {
    /// The built-in schedule with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Price of one schedule entry. Unknown names price at zero, which
    /// only matters if an engine queries a key it never charges for.
    pub fn get(&self, key: &str) -> u64 {
        self.entries.get(key).copied().unwrap_or(0)
    }

    /// Rebuild the snapshot: built-in schedule, then every `gas:<name>`
    /// parameter record layered over it. A record whose value is not
    /// exactly 8 little-endian bytes is ignored rather than trusted.
    pub fn refresh_from_params(&mut self, store: &StateStore) -> Result<(), StoreError> {
        let mut entries = default_gas_schedule();
        let prefix = param_key(GAS_PARAM_PREFIX);
        for (key, value) in store.scan_prefix(&prefix)? {
            let Ok(name) = std::str::from_utf8(&key[1..]) else {
                continue;
            };
            let Some(entry) = name.strip_prefix(GAS_PARAM_PREFIX) else {
                continue;
            };
            let Ok(bytes) = <[u8; 8]>::try_from(value.as_slice()) else {
                continue;
            };
            entries.insert(entry.to_string(), u64::from_le_bytes(bytes));
        }
        self.entries = entries;
        Ok(())
    }
}

/// The parameter key holding a gas override for one schedule entry.
pub fn gas_param_key(entry: &str) -> Vec<u8> {
    param_key(&format!("{GAS_PARAM_PREFIX}{entry}"))
}

/// Whether a raw state key is a gas override parameter.
pub fn is_gas_param_key(key: &[u8]) -> bool {
    key.first() == Some(&TAG_PARAM)
        && key[1..]
            .strip_prefix(GAS_PARAM_PREFIX.as_bytes())
            .is_some()
}
