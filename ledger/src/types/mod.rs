//! # Core Types
//!
//! The data model of the commitment layer:
//!
//! ```text
//! transaction.rs — transactions (deploy / invoke), canonical hashing
//! block.rs       — headers, blocks, genesis construction
//! layer2.rs      — layer2 state anchors
//! execution.rs   — execution results and notifications
//! ```
//!
//! Everything here is immutable once constructed and serializes with
//! bincode on disk. Hashes always exclude signature data — signatures
//! sign the hash, not the other way around.

pub mod block;
pub mod execution;
pub mod layer2;
pub mod transaction;

pub use block::{Block, BookkeeperState, Header};
pub use execution::{EventRecord, ExecNotify, ExecState, ExecuteResult, PreExecResult};
pub use layer2::Layer2State;
pub use transaction::{DeployPayload, InvokeCode, Transaction, TxKind};
