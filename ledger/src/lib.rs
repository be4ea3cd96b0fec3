// Copyright (c) 2026 Meridian Contributors. MIT License.
// See LICENSE for details.

//! # Meridian Ledger — Commitment Layer
//!
//! This crate is the part of a Meridian node that turns a validated block
//! into durable, crash-consistent storage. It computes the cryptographic
//! commitments downstream consumers rely on (state merkle chain, rolling
//! block root, per-account state hashes for layer2 inclusion proofs) and
//! recovers deterministically after a crash.
//!
//! The center of gravity is [`ledger::LedgerStore`]: it validates headers
//! and layer2 anchors, executes blocks against a transient overlay, and
//! drives the three-store atomic commit protocol. Everything else exists
//! to serve it:
//!
//! - **crypto** — hashing, the merkle accumulator, multisignature checks.
//! - **types** — blocks, headers, transactions, layer2 state anchors.
//! - **store** — the four sled-backed sub-stores and the overlay view.
//! - **exec** — the execution-engine seam and the reference engine.
//! - **events** — best-effort commit notifications.
//!
//! ## Design Philosophy
//!
//! 1. One writer at a time. A single-slot gate serializes every mutating
//!    operation; readers go through a separate RW lock and never observe
//!    a half-committed height.
//! 2. Commit order is law. Block store first, then events, then state —
//!    recovery depends on it, so the orchestration layer enforces it.
//! 3. Everything replayable. Execution is a pure function of committed
//!    state, so a crash anywhere in the protocol is repaired by replay.

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod exec;
pub mod ledger;
pub mod store;
pub mod types;

pub use error::LedgerError;
pub use ledger::LedgerStore;
