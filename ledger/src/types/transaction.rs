//! # Transactions
//!
//! Two kinds: `Deploy` installs contract code, `Invoke` runs code against
//! contract storage. The ledger core never interprets payloads — that is
//! the execution engine's job — but it does hash them, order them, and
//! commit their write-sets.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{sha256, Hash};
use crate::crypto::multisig::Address;

/// Payload of a contract deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPayload {
    /// The contract code to install.
    pub code: Vec<u8>,
    /// Human-readable contract name.
    pub name: String,
    /// Contract version string.
    pub version: String,
    /// Author / maintainer contact.
    pub author: String,
}

impl DeployPayload {
    /// The address the deployed contract will live at: derived from the
    /// code, so identical code deploys to the same address.
    pub fn contract_address(&self) -> Address {
        let digest = sha256(&self.code);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest.as_bytes()[..20]);
        Address(addr)
    }
}

/// Payload of a contract invocation. The ledger treats the code as an
/// opaque byte string; the execution engine decodes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeCode {
    /// Engine-interpreted invocation bytes.
    pub code: Vec<u8>,
}

/// Transaction kind and payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Install contract code.
    Deploy(DeployPayload),
    /// Execute an invocation against contract storage.
    Invoke(InvokeCode),
}

/// A Meridian transaction. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Kind and payload.
    pub kind: TxKind,
    /// Payer-scoped replay protection.
    pub nonce: u64,
    /// Maximum gas the payer is willing to burn.
    pub gas_limit: u64,
    /// The account paying for and attributed with this transaction.
    pub payer: Address,
}

impl Transaction {
    /// Construct a deploy transaction.
    pub fn deploy(payload: DeployPayload, payer: Address, nonce: u64, gas_limit: u64) -> Self {
        Self {
            kind: TxKind::Deploy(payload),
            nonce,
            gas_limit,
            payer,
        }
    }

    /// Construct an invoke transaction.
    pub fn invoke(code: Vec<u8>, payer: Address, nonce: u64, gas_limit: u64) -> Self {
        Self {
            kind: TxKind::Invoke(InvokeCode { code }),
            nonce,
            gas_limit,
            payer,
        }
    }

    /// Canonical transaction hash: SHA-256 over the bincode encoding of
    /// the whole transaction. Doubles as the merkle leaf for the block's
    /// transaction root.
    pub fn hash(&self) -> Hash {
        sha256(&bincode::serialize(self).unwrap_or_default())
    }
}
