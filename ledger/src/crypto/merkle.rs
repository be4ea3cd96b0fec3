//! # Merkle Accumulator & Proofs
//!
//! The commitment layer keeps two append-only merkle chains: the block
//! root chain over per-block transaction roots, and the state root chain
//! over per-block change hashes. Both are instances of the same structure:
//! an RFC 6962-style binary tree where
//!
//! ```text
//! leaf_hash(v)    = SHA-256(0x00 || v)
//! node_hash(l, r) = SHA-256(0x01 || l || r)
//! ```
//!
//! The `0x00`/`0x01` domain prefixes make leaves and interior nodes
//! unforgeable against each other (the classic second-preimage trick on
//! naive merkle trees).
//!
//! [`MerkleAccumulator`] is the rolling form: it stores only the O(log n)
//! subtree roots, so appending one leaf per block costs a handful of
//! hashes and a constant-size serialization. [`tree_root`] is the
//! independent one-pass form over a full leaf list — the test oracle for
//! the accumulator, and the tool for the one-time full-state anchor.
//! Audit paths are produced from full leaf lists, which the state store
//! keeps per height anyway.

use serde::{Deserialize, Serialize};

use super::hash::{sha256_multi, Hash};

const LEAF_PREFIX: [u8; 1] = [0x00];
const NODE_PREFIX: [u8; 1] = [0x01];

/// Domain-separated leaf hash.
pub fn leaf_hash(value: &Hash) -> Hash {
    sha256_multi(&[&LEAF_PREFIX, value.as_bytes()])
}

/// Domain-separated interior node hash.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    sha256_multi(&[&NODE_PREFIX, left.as_bytes(), right.as_bytes()])
}

// ---------------------------------------------------------------------------
// MerkleAccumulator
// ---------------------------------------------------------------------------

/// Rolling append-only merkle tree.
///
/// Stores the roots of the maximal perfect subtrees (leftmost/largest
/// first), exactly one per set bit of `size`. Appending a leaf merges
/// trailing equal-height subtrees; the overall root folds the subtree
/// roots right to left. The result is bit-for-bit identical to
/// [`tree_root`] over the same leaves, which is what makes incremental
/// queries trustworthy.
///
/// Serializable, so the state store can persist it inside the same batch
/// that commits the leaf it was extended with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleAccumulator {
    size: u64,
    roots: Vec<Hash>,
}

impl MerkleAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves appended so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append one leaf value.
    pub fn append(&mut self, leaf: Hash) {
        let mut node = leaf_hash(&leaf);
        let mut size = self.size;
        while size & 1 == 1 {
            if let Some(left) = self.roots.pop() {
                node = node_hash(&left, &node);
            }
            size >>= 1;
        }
        self.roots.push(node);
        self.size += 1;
    }

    /// Root over everything appended so far. [`Hash::ZERO`] when empty.
    pub fn root(&self) -> Hash {
        match self.roots.split_last() {
            None => Hash::ZERO,
            Some((last, rest)) => rest
                .iter()
                .rev()
                .fold(*last, |acc, left| node_hash(left, &acc)),
        }
    }

    /// The root this accumulator *would* have after appending `leaves`,
    /// without mutating it. Used to check a header's declared block root
    /// before anything is committed, and for speculative state roots.
    pub fn root_with_new_leaves(&self, leaves: &[Hash]) -> Hash {
        let mut scratch = self.clone();
        for leaf in leaves {
            scratch.append(*leaf);
        }
        scratch.root()
    }
}

// ---------------------------------------------------------------------------
// One-pass root
// ---------------------------------------------------------------------------

/// One-pass merkle root over a full leaf list (RFC 6962 `MTH`).
/// [`Hash::ZERO`] for an empty list.
pub fn tree_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::ZERO,
        1 => leaf_hash(&leaves[0]),
        n => {
            let k = split_point(n);
            node_hash(&tree_root(&leaves[..k]), &tree_root(&leaves[k..]))
        }
    }
}

/// Largest power of two strictly less than `n` (`n >= 2`).
fn split_point(n: usize) -> usize {
    if n.is_power_of_two() {
        n / 2
    } else {
        n.next_power_of_two() / 2
    }
}

// ---------------------------------------------------------------------------
// Audit paths
// ---------------------------------------------------------------------------

/// A merkle inclusion proof: the audit path of one leaf in a tree of a
/// known size. Verifiable against the tree root without the leaf list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Zero-based index of the proven leaf.
    pub index: u64,
    /// Number of leaves in the tree the proof was built against.
    pub tree_size: u64,
    /// Sibling hashes, leaf level first.
    pub path: Vec<Hash>,
}

impl MerkleProof {
    /// Build the audit path for `leaves[index]`.
    ///
    /// Returns `None` when the index is out of range or the list is empty.
    pub fn for_leaf(index: usize, leaves: &[Hash]) -> Option<Self> {
        if index >= leaves.len() {
            return None;
        }
        Some(Self {
            index: index as u64,
            tree_size: leaves.len() as u64,
            path: audit_path(index, leaves),
        })
    }

    /// Locate `target` in `leaves` and build its proof.
    pub fn for_value(target: &Hash, leaves: &[Hash]) -> Option<Self> {
        let index = leaves.iter().position(|l| l == target)?;
        Self::for_leaf(index, leaves)
    }

    /// Verify this proof: does `leaf` at `self.index` hash up to `root`
    /// in a tree of `self.tree_size` leaves?
    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        if self.tree_size == 0 || self.index >= self.tree_size {
            return false;
        }
        let mut fnode = self.index;
        let mut snode = self.tree_size - 1;
        let mut acc = leaf_hash(leaf);
        for sibling in &self.path {
            if snode == 0 {
                return false;
            }
            if fnode & 1 == 1 || fnode == snode {
                acc = node_hash(sibling, &acc);
                if fnode & 1 == 0 {
                    // Skip levels where this node is a right-edge child
                    // with no sibling.
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                acc = node_hash(&acc, sibling);
            }
            fnode >>= 1;
            snode >>= 1;
        }
        snode == 0 && acc == *root
    }
}

/// RFC 6962 `PATH(m, D)`: sibling hashes for leaf `m`, leaf level first.
fn audit_path(m: usize, leaves: &[Hash]) -> Vec<Hash> {
    if leaves.len() <= 1 {
        return Vec::new();
    }
    let k = split_point(leaves.len());
    let mut path;
    if m < k {
        path = audit_path(m, &leaves[..k]);
        path.push(tree_root(&leaves[k..]));
    } else {
        path = audit_path(m - k, &leaves[k..]);
        path.push(tree_root(&leaves[..k]));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    fn leaves(n: u64) -> Vec<Hash> {
        (0..n).map(|i| sha256(&i.to_le_bytes())).collect()
    }

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(MerkleAccumulator::new().root(), Hash::ZERO);
        assert_eq!(tree_root(&[]), Hash::ZERO);
    }

    #[test]
    fn accumulator_matches_one_pass_root() {
        // The incremental accumulator queried after each append must equal
        // a root computed independently in one pass over the same prefix.
        let all = leaves(17);
        let mut acc = MerkleAccumulator::new();
        for n in 0..all.len() {
            acc.append(all[n]);
            assert_eq!(
                acc.root(),
                tree_root(&all[..=n]),
                "divergence at {} leaves",
                n + 1
            );
        }
    }

    #[test]
    fn root_with_new_leaves_does_not_mutate() {
        let all = leaves(6);
        let mut acc = MerkleAccumulator::new();
        for leaf in &all[..4] {
            acc.append(*leaf);
        }
        let before = acc.root();

        let speculative = acc.root_with_new_leaves(&all[4..]);
        assert_eq!(speculative, tree_root(&all));
        assert_eq!(acc.root(), before);
        assert_eq!(acc.size(), 4);
    }

    #[test]
    fn leaf_order_matters() {
        let mut fwd = leaves(4);
        let root_fwd = tree_root(&fwd);
        fwd.swap(0, 3);
        assert_ne!(root_fwd, tree_root(&fwd));
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let leaf = sha256(b"only");
        assert_eq!(tree_root(&[leaf]), leaf_hash(&leaf));
    }

    #[test]
    fn accumulator_serialization_roundtrip() {
        let mut acc = MerkleAccumulator::new();
        for leaf in leaves(5) {
            acc.append(leaf);
        }
        let bytes = bincode::serialize(&acc).unwrap();
        let restored: MerkleAccumulator = bincode::deserialize(&bytes).unwrap();
        assert_eq!(acc, restored);
        assert_eq!(acc.root(), restored.root());
    }

    #[test]
    fn audit_paths_verify_for_every_leaf() {
        for n in 1..=9u64 {
            let list = leaves(n);
            let root = tree_root(&list);
            for (i, leaf) in list.iter().enumerate() {
                let proof = MerkleProof::for_leaf(i, &list).unwrap();
                assert!(proof.verify(leaf, &root), "size {n} leaf {i}");
            }
        }
    }

    #[test]
    fn audit_path_rejects_wrong_leaf() {
        let list = leaves(7);
        let root = tree_root(&list);
        let proof = MerkleProof::for_leaf(3, &list).unwrap();
        assert!(!proof.verify(&list[4], &root));
        assert!(!proof.verify(&sha256(b"forged"), &root));
    }

    #[test]
    fn audit_path_rejects_tampered_sibling() {
        let list = leaves(8);
        let root = tree_root(&list);
        let mut proof = MerkleProof::for_leaf(2, &list).unwrap();
        proof.path[1] = sha256(b"tampered");
        assert!(!proof.verify(&list[2], &root));
    }

    #[test]
    fn for_value_locates_leaf() {
        let list = leaves(5);
        let root = tree_root(&list);
        let proof = MerkleProof::for_value(&list[4], &list).unwrap();
        assert_eq!(proof.index, 4);
        assert!(proof.verify(&list[4], &root));
        assert!(MerkleProof::for_value(&sha256(b"absent"), &list).is_none());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let list = leaves(3);
        assert!(MerkleProof::for_leaf(3, &list).is_none());
        assert!(MerkleProof::for_leaf(0, &[]).is_none());
    }
}
