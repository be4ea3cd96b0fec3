//! # Ledger Core
//!
//! [`LedgerStore`] orchestrates the four sub-stores: it validates
//! headers and layer2 anchors, executes blocks through the engine seam,
//! drives the block/event/state commit protocol, and repairs partial
//! commits by replay on startup. One writer at a time, readers never
//! blocked by a commit in flight.

mod store;

pub use store::LedgerStore;
