//! # Hashing Utilities
//!
//! SHA-256 is the consensus hash of the Meridian chain: block headers,
//! merkle tree nodes, overlay change hashes, and bookkeeper addresses are
//! all SHA-256 digests. The [`Hash`] newtype keeps those 32 bytes from
//! being confused with every other `[u8; 32]` in the codebase.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
///
/// The all-zero value is a sentinel meaning "no hash": the parent hash of
/// the genesis header, the root of an empty merkle tree, the state root
/// of heights below the checkpoint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The zero sentinel.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Wrap raw digest bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hex-encoded representation, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", &self.to_hex()[..12])
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Compute the SHA-256 digest of the input.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Hash multiple byte slices as if they were concatenated, without the
/// temporary buffer. Used for composite preimages like `tag || left || right`.
pub fn sha256_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        let h = sha256(b"");
        assert_eq!(
            h.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn multi_matches_concatenation() {
        let split = sha256_multi(&[b"meri", b"dian"]);
        let whole = sha256(b"meridian");
        assert_eq!(split, whole);
    }

    #[test]
    fn zero_sentinel() {
        assert!(Hash::ZERO.is_zero());
        assert!(!sha256(b"x").is_zero());
        assert_eq!(Hash::default(), Hash::ZERO);
    }

    #[test]
    fn hex_roundtrip() {
        let h = sha256(b"roundtrip");
        let recovered = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, recovered);
    }

    #[test]
    fn hex_rejects_wrong_length() {
        assert!(Hash::from_hex("deadbeef").is_err());
        assert!(Hash::from_hex("not hex at all").is_err());
    }
}
