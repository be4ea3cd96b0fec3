//! # Cryptographic Primitives
//!
//! Leaf utilities consumed by everything above them:
//!
//! ```text
//! hash.rs     — SHA-256 helpers and the Hash digest newtype
//! keys.rs     — Ed25519 keypairs, public keys, signatures
//! merkle.rs   — rolling merkle accumulator, one-pass roots, audit paths
//! multisig.rs — bookkeeper sets, address commitments, m-of-n verification
//! ```
//!
//! SHA-256 is the consensus hash: headers, merkle nodes, change hashes,
//! and bookkeeper addresses all go through it. Nothing in this module
//! touches storage or the ledger — pure functions only.

pub mod hash;
pub mod keys;
pub mod merkle;
pub mod multisig;

pub use hash::{sha256, sha256_multi, Hash};
pub use keys::{Keypair, PublicKey, Signature};
pub use merkle::{tree_root, MerkleAccumulator, MerkleProof};
pub use multisig::{bookkeeper_address, quorum, sort_bookkeepers, verify_multisig, Address};
