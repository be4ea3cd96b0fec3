//! # Blocks & Headers
//!
//! A block is a header plus an ordered transaction list, immutable once
//! constructed. The header carries the chain linkage (height, previous
//! hash, timestamp), the commitments (transaction root, rolling block
//! root), and the authority (bookkeeper list, next-bookkeeper address,
//! multisignature over the header hash).
//!
//! ## Hash Computation
//!
//! `Header::hash()` covers every field *except* the signature data: the
//! bookkeepers sign the hash, so the hash cannot include the signatures.
//!
//! ## Bookkeeper hand-off
//!
//! Header `h` declares the address of the signer set expected at height
//! `h+1`. Validation of height `h+1` recomputes the address from its
//! listed keys and requires equality with the parent's declaration — the
//! signer set can only change with the outgoing set's consent.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{sha256, Hash};
use crate::crypto::keys::{Keypair, PublicKey, Signature};
use crate::crypto::merkle::tree_root;
use crate::crypto::multisig::{bookkeeper_address, sort_bookkeepers, Address, MultisigError};

use super::transaction::Transaction;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Block header: linkage, commitments, and signing authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block height, genesis = 0.
    pub height: u64,
    /// Hash of the parent header. [`Hash::ZERO`] for genesis.
    pub prev_hash: Hash,
    /// Unix timestamp (seconds). Strictly increasing along the chain.
    pub timestamp: u64,
    /// Merkle root over this block's transaction hashes.
    pub tx_root: Hash,
    /// Rolling merkle root over all transaction roots through this
    /// height. [`Hash::ZERO`] for genesis.
    pub block_root: Hash,
    /// The bookkeeper set whose signatures authenticate this header.
    pub bookkeepers: Vec<PublicKey>,
    /// Address commitment to the signer set expected at the next height.
    pub next_bookkeeper: Address,
    /// Multisignature over [`Header::hash`]. Excluded from the hash.
    pub sig_data: Vec<Signature>,
}

/// The signed portion of a header, borrowed for hashing.
#[derive(Serialize)]
struct UnsignedHeader<'a> {
    height: u64,
    prev_hash: &'a Hash,
    timestamp: u64,
    tx_root: &'a Hash,
    block_root: &'a Hash,
    bookkeepers: &'a [PublicKey],
    next_bookkeeper: &'a Address,
}

impl Header {
    /// The header hash: SHA-256 over the bincode encoding of every field
    /// except `sig_data`.
    pub fn hash(&self) -> Hash {
        let unsigned = UnsignedHeader {
            height: self.height,
            prev_hash: &self.prev_hash,
            timestamp: self.timestamp,
            tx_root: &self.tx_root,
            block_root: &self.block_root,
            bookkeepers: &self.bookkeepers,
            next_bookkeeper: &self.next_bookkeeper,
        };
        sha256(&bincode::serialize(&unsigned).unwrap_or_default())
    }

    /// Append one bookkeeper's signature over the header hash.
    pub fn sign(&mut self, keypair: &Keypair) {
        let digest = self.hash();
        self.sig_data.push(keypair.sign(digest.as_bytes()));
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header + ordered transactions. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header with chain linkage and commitments.
    pub header: Header,
    /// Ordered transactions included in this block.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Construct the genesis block for a bookkeeper set.
    ///
    /// Height 0, zero parent hash, zero block root, no signatures (there
    /// is no prior quorum to demand them). The bookkeeper list is sorted
    /// canonically and the next-bookkeeper address commits to the same
    /// set.
    pub fn genesis(
        bookkeepers: &[PublicKey],
        timestamp: u64,
        transactions: Vec<Transaction>,
    ) -> Result<Self, MultisigError> {
        let sorted = sort_bookkeepers(bookkeepers);
        let next = bookkeeper_address(&sorted)?;
        Ok(Self {
            header: Header {
                height: 0,
                prev_hash: Hash::ZERO,
                timestamp,
                tx_root: compute_tx_root(&transactions),
                block_root: Hash::ZERO,
                bookkeepers: sorted,
                next_bookkeeper: next,
                sig_data: Vec::new(),
            },
            transactions,
        })
    }

    /// Construct an unsigned block extending `parent`.
    ///
    /// `block_root` is the rolling accumulator root including this
    /// block's transaction root; the ledger store recomputes and checks
    /// it at submit time. The caller signs the header afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        parent: &Header,
        transactions: Vec<Transaction>,
        bookkeepers: &[PublicKey],
        next_bookkeeper: Address,
        timestamp: u64,
        block_root: Hash,
    ) -> Self {
        Self {
            header: Header {
                height: parent.height + 1,
                prev_hash: parent.hash(),
                timestamp,
                tx_root: compute_tx_root(&transactions),
                block_root,
                bookkeepers: sort_bookkeepers(bookkeepers),
                next_bookkeeper,
                sig_data: Vec::new(),
            },
            transactions,
        }
    }

    /// The block hash — the hash of its header.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Ordered transaction hashes.
    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }
}

/// Merkle root over a transaction list's hashes. [`Hash::ZERO`] for an
/// empty block.
pub fn compute_tx_root(transactions: &[Transaction]) -> Hash {
    let leaves: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
    tree_root(&leaves)
}

// ---------------------------------------------------------------------------
// BookkeeperState
// ---------------------------------------------------------------------------

/// The persisted bookkeeper record: the set currently signing and the
/// set the chain has committed to next. Written at genesis and updated
/// by governance transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookkeeperState {
    /// Keys signing at the current height, canonical order.
    pub current: Vec<PublicKey>,
    /// Keys expected at the next hand-off, canonical order.
    pub next: Vec<PublicKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyset(n: u8) -> Vec<Keypair> {
        (0..n).map(|i| Keypair::from_seed(&[i + 1; 32])).collect()
    }

    fn pubs(kps: &[Keypair]) -> Vec<PublicKey> {
        kps.iter().map(|k| k.public_key()).collect()
    }

    #[test]
    fn genesis_shape() {
        let kps = keyset(4);
        let genesis = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        assert_eq!(genesis.height(), 0);
        assert_eq!(genesis.header.prev_hash, Hash::ZERO);
        assert_eq!(genesis.header.block_root, Hash::ZERO);
        assert_eq!(genesis.header.tx_root, Hash::ZERO);
        assert!(genesis.header.sig_data.is_empty());
        assert_eq!(
            genesis.header.next_bookkeeper,
            bookkeeper_address(&pubs(&kps)).unwrap()
        );
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        let kps = keyset(4);
        let g1 = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        let g2 = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        assert_eq!(g1.hash(), g2.hash());
    }

    #[test]
    fn header_hash_excludes_signatures() {
        let kps = keyset(4);
        let mut block = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        let unsigned = block.hash();
        for kp in &kps {
            block.header.sign(kp);
        }
        assert_eq!(block.hash(), unsigned);
        assert_eq!(block.header.sig_data.len(), 4);
    }

    #[test]
    fn header_hash_covers_linkage() {
        let kps = keyset(4);
        let genesis = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        let block = Block::build(
            &genesis.header,
            vec![],
            &pubs(&kps),
            genesis.header.next_bookkeeper,
            1_700_000_001,
            Hash::ZERO,
        );
        assert_eq!(block.height(), 1);
        assert_eq!(block.header.prev_hash, genesis.hash());
        assert_ne!(block.hash(), genesis.hash());

        let mut tampered = block.clone();
        tampered.header.timestamp += 1;
        assert_ne!(tampered.hash(), block.hash());
    }

    #[test]
    fn tx_root_is_order_sensitive() {
        let a = Transaction::invoke(vec![1], Address([1; 20]), 0, 1000);
        let b = Transaction::invoke(vec![2], Address([2; 20]), 0, 1000);
        let root_ab = compute_tx_root(&[a.clone(), b.clone()]);
        let root_ba = compute_tx_root(&[b, a]);
        assert_ne!(root_ab, root_ba);
    }

    #[test]
    fn block_serialization_roundtrip() {
        let kps = keyset(4);
        let genesis = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        let bytes = bincode::serialize(&genesis).unwrap();
        let back: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(genesis, back);
        assert_eq!(genesis.hash(), back.hash());
    }
}
