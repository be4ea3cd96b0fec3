//! # Storage Layer
//!
//! Four sled-backed sub-stores plus the execution overlay:
//!
//! ```text
//! block_store.rs   — blocks by hash, version marker, current pointer,
//!                    header index chunks
//! state_store.rs   — raw state KV, merkle accumulators, per-height
//!                    roots, account state hashes, bookkeeper state
//! event_store.rs   — per-transaction execution notifications
//! layer2_store.rs  — verified layer2 anchors (direct write)
//! overlay.rs       — transient block/transaction write layers
//! common.rs        — errors, key layout, codec helpers
//! ```
//!
//! The block, state, and event stores expose the same staged-batch
//! protocol (`begin_batch` / `stage_*` / `commit_batch`); the ledger
//! core sequences their commits. No sub-store ever talks to another.

pub mod block_store;
pub mod common;
pub mod event_store;
pub mod layer2_store;
pub mod overlay;
pub mod state_store;

pub use block_store::BlockStore;
pub use common::{
    contract_key, param_key, split_storage_key, storage_key, StoreError, TAG_CONTRACT,
    TAG_PARAM, TAG_STORAGE,
};
pub use event_store::EventStore;
pub use layer2_store::Layer2Store;
pub use overlay::{ExecCache, OverlayDb};
pub use state_store::StateStore;
