//! Execution results: what the engine hands back to the ledger core
//! after running a block, and what the event store persists per
//! transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::hash::Hash;
use crate::crypto::multisig::Address;

/// Terminal state of one transaction's execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecState {
    /// The transaction ran to completion and its writes were kept.
    Success,
    /// The transaction aborted (bad payload, out of gas). Its writes
    /// were discarded; only the failure record remains.
    Failed,
}

/// One event emitted by a contract during execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Contract that emitted the event.
    pub contract: Address,
    /// Opaque event payload.
    pub payload: Vec<u8>,
}

/// Per-transaction execution notification, persisted by the event store
/// and included in commit notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecNotify {
    /// Hash of the executed transaction.
    pub tx_hash: Hash,
    /// Terminal state.
    pub state: ExecState,
    /// Gas actually consumed, capped at the transaction's limit.
    pub gas_consumed: u64,
    /// Engine-defined return value, when the transaction produced one.
    pub result: Option<Vec<u8>>,
    /// Events emitted during execution, in emission order.
    pub events: Vec<EventRecord>,
}

/// Full result of executing one block against the current state.
///
/// Produced by execution, consumed by submit: the write-set becomes the
/// state batch, `state_root` goes into the per-height root table, and
/// the notifications go to the event store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Hash over the block's sorted write-set. The leaf appended to the
    /// state root chain after the checkpoint height.
    pub change_hash: Hash,
    /// Key-ordered writes to apply. `None` deletes the key.
    pub write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// State root for this height per the three-phase schedule.
    pub state_root: Hash,
    /// Per-transaction notifications, block order.
    pub notify: Vec<ExecNotify>,
    /// Merkle root over the touched accounts' state hashes.
    pub account_state_root: Hash,
    /// State hashes of the touched accounts, canonical order.
    pub account_states: Vec<Hash>,
}

/// Result of a speculative (pre-execute) run. Nothing was persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreExecResult {
    /// Terminal state the transaction would have reached.
    pub state: ExecState,
    /// Gas it would have consumed.
    pub gas: u64,
    /// Return value it would have produced.
    pub result: Option<Vec<u8>>,
    /// Events it would have emitted.
    pub notify: Vec<EventRecord>,
}
