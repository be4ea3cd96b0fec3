//! Layer2 state anchors: periodic commitments from the layer2 operator
//! set, pinning an off-chain state root and transaction root to a base
//! height. Verified against the stored bookkeeper set before storage.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{sha256, Hash};
use crate::crypto::keys::{Keypair, Signature};

/// A signed layer2 state anchor for one base-chain height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer2State {
    /// Base-chain height this anchor is bound to.
    pub height: u64,
    /// Anchor format version. Must equal
    /// [`crate::config::LAYER2_STATE_VERSION`].
    pub version: u32,
    /// Root of the off-chain state at this height.
    pub state_root: Hash,
    /// Root of the off-chain transactions folded into that state.
    pub tx_root: Hash,
    /// Operator multisignature over [`Layer2State::hash`].
    pub sig_data: Vec<Signature>,
}

/// The signed portion of an anchor, borrowed for hashing.
#[derive(Serialize)]
struct UnsignedAnchor<'a> {
    height: u64,
    version: u32,
    state_root: &'a Hash,
    tx_root: &'a Hash,
}

impl Layer2State {
    /// The anchor hash: SHA-256 over the bincode encoding of every field
    /// except `sig_data`.
    pub fn hash(&self) -> Hash {
        let unsigned = UnsignedAnchor {
            height: self.height,
            version: self.version,
            state_root: &self.state_root,
            tx_root: &self.tx_root,
        };
        sha256(&bincode::serialize(&unsigned).unwrap_or_default())
    }

    /// Append one operator's signature over the anchor hash.
    pub fn sign(&mut self, keypair: &Keypair) {
        let digest = self.hash();
        self.sig_data.push(keypair.sign(digest.as_bytes()));
    }
}
