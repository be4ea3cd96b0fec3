//! # Bookkeeper Multisignatures
//!
//! A header is authenticated by an m-of-n multisignature: `n` bookkeeper
//! public keys listed in the header, of which at least
//! `m = n - floor((n - 1) / 3)` must have signed the header hash — the
//! Byzantine quorum tolerating up to `floor((n - 1) / 3)` faulty signers.
//!
//! The *address* of a bookkeeper set is a 20-byte commitment over the
//! sorted keys and the threshold. A header commits to the next height's
//! signer set by declaring that address; the next header's key list must
//! hash back to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::hash::{sha256_multi, Hash};
use super::keys::{PublicKey, Signature};

/// Domain tag mixed into bookkeeper address derivation.
const ADDRESS_DOMAIN: &[u8] = b"meridian:bookkeepers:v1";

/// Errors from multisignature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultisigError {
    /// The key list is empty; there is nobody to verify against.
    #[error("empty bookkeeper set")]
    EmptyBookkeepers,

    /// More signatures supplied than there are listed keys.
    #[error("too many signatures: {got} for {keys} bookkeepers")]
    TooManySignatures { got: usize, keys: usize },

    /// A signature did not verify under any unused listed key.
    #[error("signature {index} does not match any unused bookkeeper key")]
    UnknownSigner { index: usize },

    /// Fewer valid signatures than the required threshold.
    #[error("quorum not met: {got} valid signatures, {required} required")]
    QuorumNotMet { got: usize, required: usize },
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account, contract, or bookkeeper-set identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero sentinel (genesis has no parent commitment to satisfy).
    pub const ZERO: Address = Address([0u8; 20]);

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex-encoded representation, 40 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Bookkeeper sets
// ---------------------------------------------------------------------------

/// Byzantine quorum for `n` signers: `n - floor((n - 1) / 3)`.
/// Zero for an empty set, which [`verify_multisig`] rejects outright.
pub fn quorum(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        n - (n - 1) / 3
    }
}

/// Canonical ordering of a bookkeeper key list: ascending by encoded
/// bytes. Both the address derivation and the persisted bookkeeper state
/// use this order, so two nodes given the same set in different orders
/// agree on every derived value.
pub fn sort_bookkeepers(keys: &[PublicKey]) -> Vec<PublicKey> {
    let mut sorted = keys.to_vec();
    sorted.sort();
    sorted
}

/// Derive the 20-byte address committing to a bookkeeper set.
///
/// The digest covers a domain tag, `n`, the quorum `m`, and every key in
/// canonical order; the address is the first 20 bytes. Input order does
/// not matter — the keys are sorted internally.
pub fn bookkeeper_address(keys: &[PublicKey]) -> Result<Address, MultisigError> {
    if keys.is_empty() {
        return Err(MultisigError::EmptyBookkeepers);
    }
    let sorted = sort_bookkeepers(keys);
    let n = sorted.len() as u16;
    let m = quorum(sorted.len()) as u16;

    let mut parts: Vec<&[u8]> = vec![ADDRESS_DOMAIN];
    let n_bytes = n.to_le_bytes();
    let m_bytes = m.to_le_bytes();
    parts.push(&n_bytes);
    parts.push(&m_bytes);
    for key in &sorted {
        parts.push(key.as_bytes());
    }
    let digest = sha256_multi(&parts);

    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.as_bytes()[..20]);
    Ok(Address(addr))
}

/// Verify an m-of-n multisignature over a digest.
///
/// Each signature must verify under a *distinct* listed key; `m` or more
/// must do so. Signature order is independent of key order. A signature
/// matching no unused key fails the whole check — sloppy signature lists
/// are rejected rather than skipped, so a valid result means every byte
/// supplied was accounted for.
pub fn verify_multisig(
    digest: &Hash,
    keys: &[PublicKey],
    m: usize,
    sigs: &[Signature],
) -> Result<(), MultisigError> {
    if keys.is_empty() {
        return Err(MultisigError::EmptyBookkeepers);
    }
    if sigs.len() > keys.len() {
        return Err(MultisigError::TooManySignatures {
            got: sigs.len(),
            keys: keys.len(),
        });
    }

    let mut used = vec![false; keys.len()];
    let mut valid = 0usize;
    for (index, sig) in sigs.iter().enumerate() {
        let matched = keys.iter().enumerate().find_map(|(k, key)| {
            (!used[k] && key.verify(digest.as_bytes(), sig)).then_some(k)
        });
        match matched {
            Some(k) => {
                used[k] = true;
                valid += 1;
            }
            None => return Err(MultisigError::UnknownSigner { index }),
        }
    }

    if valid < m {
        return Err(MultisigError::QuorumNotMet {
            got: valid,
            required: m,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;
    use crate::crypto::keys::Keypair;

    fn keyset(n: u8) -> Vec<Keypair> {
        (0..n).map(|i| Keypair::from_seed(&[i + 1; 32])).collect()
    }

    #[test]
    fn quorum_formula() {
        // n - floor((n-1)/3): 1->1, 4->3, 7->5, 10->7.
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(7), 5);
        assert_eq!(quorum(10), 7);
        assert_eq!(quorum(0), 0);
    }

    #[test]
    fn address_is_order_independent() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let mut shuffled = keys.clone();
        shuffled.reverse();
        assert_eq!(
            bookkeeper_address(&keys).unwrap(),
            bookkeeper_address(&shuffled).unwrap()
        );
    }

    #[test]
    fn address_changes_with_set() {
        let kps = keyset(5);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let a4 = bookkeeper_address(&keys[..4]).unwrap();
        let a5 = bookkeeper_address(&keys).unwrap();
        assert_ne!(a4, a5);
    }

    #[test]
    fn empty_set_has_no_address() {
        assert_eq!(
            bookkeeper_address(&[]),
            Err(MultisigError::EmptyBookkeepers)
        );
    }

    #[test]
    fn four_of_four_verifies() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        let sigs: Vec<_> = kps.iter().map(|k| k.sign(digest.as_bytes())).collect();
        assert!(verify_multisig(&digest, &keys, quorum(4), &sigs).is_ok());
    }

    #[test]
    fn three_of_four_meets_quorum() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        let sigs: Vec<_> = kps[..3].iter().map(|k| k.sign(digest.as_bytes())).collect();
        assert!(verify_multisig(&digest, &keys, quorum(4), &sigs).is_ok());
    }

    #[test]
    fn two_of_four_misses_quorum() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        let sigs: Vec<_> = kps[..2].iter().map(|k| k.sign(digest.as_bytes())).collect();
        assert_eq!(
            verify_multisig(&digest, &keys, quorum(4), &sigs),
            Err(MultisigError::QuorumNotMet { got: 2, required: 3 })
        );
    }

    #[test]
    fn outsider_signature_rejected() {
        let kps = keyset(4);
        let outsider = Keypair::from_seed(&[99; 32]);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        let mut sigs: Vec<_> = kps[..3].iter().map(|k| k.sign(digest.as_bytes())).collect();
        sigs.push(outsider.sign(digest.as_bytes()));
        assert_eq!(
            verify_multisig(&digest, &keys, quorum(4), &sigs),
            Err(MultisigError::UnknownSigner { index: 3 })
        );
    }

    #[test]
    fn duplicate_signer_cannot_double_count() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        // Same bookkeeper signing twice: the second copy finds no unused key.
        let sig = kps[0].sign(digest.as_bytes());
        let sigs = vec![sig.clone(), sig.clone(), kps[1].sign(digest.as_bytes())];
        assert!(verify_multisig(&digest, &keys, quorum(4), &sigs).is_err());
    }

    #[test]
    fn signature_order_does_not_matter() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let digest = sha256(b"header");
        let mut sigs: Vec<_> = kps[..3].iter().map(|k| k.sign(digest.as_bytes())).collect();
        sigs.reverse();
        assert!(verify_multisig(&digest, &keys, quorum(4), &sigs).is_ok());
    }

    #[test]
    fn wrong_digest_fails() {
        let kps = keyset(4);
        let keys: Vec<_> = kps.iter().map(|k| k.public_key()).collect();
        let sigs: Vec<_> = kps
            .iter()
            .map(|k| k.sign(sha256(b"signed this").as_bytes()))
            .collect();
        assert!(verify_multisig(&sha256(b"verifying that"), &keys, 3, &sigs).is_err());
    }
}
