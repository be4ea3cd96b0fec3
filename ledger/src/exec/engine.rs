//! # Execution Engine Seam
//!
//! The ledger core does not interpret transactions. It hands each one to
//! an [`ExecutionEngine`] together with the block overlay and the gas
//! table, and takes back an [`ExecNotify`]. A failed transaction is a
//! *result*, not an error: its notification records the failure and the
//! block commits without its writes. Only infrastructure failures (a
//! storage read going down mid-execution) abort the block.
//!
//! [`NativeEngine`] is the reference engine: deploys install code at a
//! code-derived address, invocations decode to a list of storage
//! operations. It exists so the commitment layer is testable end to end
//! without a VM; a real VM plugs in through the same trait.

use serde::{Deserialize, Serialize};

use crate::config::{
    GAS_KEY_CONTRACT_CREATE, GAS_KEY_DEPLOY_BYTE, GAS_KEY_STORAGE_DELETE, GAS_KEY_STORAGE_PUT,
    GAS_KEY_TX_BASE,
};
use crate::crypto::hash::Hash;
use crate::crypto::multisig::Address;
use crate::store::common::{contract_key, storage_key, StoreError};
use crate::store::{ExecCache, OverlayDb};
use crate::types::{EventRecord, ExecNotify, ExecState, Transaction, TxKind};

use super::gas::{gas_param_key, GasTable};

/// Event payload tag: an account's record was set.
const EVENT_SET: u8 = 0x01;
/// Event payload tag: an account's record was deleted.
const EVENT_DELETE: u8 = 0x02;

/// Block-level context an engine executes under.
#[derive(Clone, Copy, Debug)]
pub struct ExecContext {
    /// Height of the block being executed.
    pub height: u64,
    /// Timestamp of the block being executed.
    pub timestamp: u64,
    /// Hash of the block being executed.
    pub block_hash: Hash,
    /// Speculative run: results are returned, never persisted.
    pub pre_exec: bool,
}

/// One storage operation inside a native invocation payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageOp {
    /// Set one account's record under a contract.
    Set {
        contract: Address,
        account: Address,
        value: Vec<u8>,
    },
    /// Delete one account's record under a contract.
    Delete { contract: Address, account: Address },
    /// Override a gas schedule entry. Takes effect from the next block.
    SetGasParam { name: String, value: u64 },
}

/// The seam between the commitment layer and transaction semantics.
pub trait ExecutionEngine: Send + Sync {
    /// Execute one transaction against the block overlay.
    ///
    /// Transaction-level failures are reported inside the returned
    /// notification with no overlay writes; `Err` is reserved for
    /// infrastructure failures that must abort the whole block.
    fn execute(
        &self,
        ctx: &ExecContext,
        tx: &Transaction,
        overlay: &mut OverlayDb<'_>,
        gas: &GasTable,
    ) -> Result<ExecNotify, StoreError>;
}

/// The built-in storage-operation engine.
#[derive(Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }

    fn failed(tx: &Transaction, gas_consumed: u64) -> ExecNotify {
        ExecNotify {
            tx_hash: tx.hash(),
            state: ExecState::Failed,
            gas_consumed: gas_consumed.min(tx.gas_limit),
            result: None,
            events: Vec::new(),
        }
    }
}

impl ExecutionEngine for NativeEngine {
    fn execute(
        &self,
        _ctx: &ExecContext,
        tx: &Transaction,
        overlay: &mut OverlayDb<'_>,
        gas: &GasTable,
    ) -> Result<ExecNotify, StoreError> {
        let base = gas.get(GAS_KEY_TX_BASE);
        if tx.gas_limit < base {
            return Ok(Self::failed(tx, tx.gas_limit));
        }

        match &tx.kind {
            TxKind::Deploy(payload) => {
                let cost = base
                    .saturating_add(gas.get(GAS_KEY_CONTRACT_CREATE))
                    .saturating_add(
                        gas.get(GAS_KEY_DEPLOY_BYTE).saturating_mul(payload.code.len() as u64),
                    );
                if cost > tx.gas_limit {
                    return Ok(Self::failed(tx, tx.gas_limit));
                }
                let address = payload.contract_address();
                overlay.put(contract_key(&address), payload.code.clone());
                Ok(ExecNotify {
                    tx_hash: tx.hash(),
                    state: ExecState::Success,
                    gas_consumed: cost,
                    result: Some(address.as_bytes().to_vec()),
                    events: vec![EventRecord {
                        contract: address,
                        payload: payload.name.clone().into_bytes(),
                    }],
                })
            }
            TxKind::Invoke(invoke) => {
                let Ok(ops) = bincode::deserialize::<Vec<StorageOp>>(&invoke.code) else {
                    return Ok(Self::failed(tx, base));
                };

                let mut cache = ExecCache::new();
                let mut events = Vec::new();
                let mut consumed = base;
                for op in ops {
                    let cost = match &op {
                        StorageOp::Set { .. } | StorageOp::SetGasParam { .. } => {
                            gas.get(GAS_KEY_STORAGE_PUT)
                        }
                        StorageOp::Delete { .. } => gas.get(GAS_KEY_STORAGE_DELETE),
                    };
                    consumed = consumed.saturating_add(cost);
                    if consumed > tx.gas_limit {
                        return Ok(Self::failed(tx, tx.gas_limit));
                    }
                    match op {
                        StorageOp::Set {
                            contract,
                            account,
                            value,
                        } => {
                            cache.put(storage_key(&contract, &account), value);
                            let mut payload = vec![EVENT_SET];
                            payload.extend_from_slice(account.as_bytes());
                            events.push(EventRecord { contract, payload });
                        }
                        StorageOp::Delete { contract, account } => {
                            cache.delete(storage_key(&contract, &account));
                            let mut payload = vec![EVENT_DELETE];
                            payload.extend_from_slice(account.as_bytes());
                            events.push(EventRecord { contract, payload });
                        }
                        StorageOp::SetGasParam { name, value } => {
                            cache.put(gas_param_key(&name), value.to_le_bytes().to_vec());
                            events.push(EventRecord {
                                contract: Address::ZERO,
                                payload: name.into_bytes(),
                            });
                        }
                    }
                }

                cache.commit_into(overlay);
                Ok(ExecNotify {
                    tx_hash: tx.hash(),
                    state: ExecState::Success,
                    gas_consumed: consumed,
                    result: None,
                    events,
                })
            }
        }
    }
}
