// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Leader election data exchanged between validators

use serde::{Deserialize, Serialize};

use crate::{
    error::HotPoktError,
    signature_key::{verify_signature, PublicKey, Signature, SignatureKeyPair},
    validator::NodeId,
    view::{Height, Round},
    vrf::{VrfOutput, VrfProof, VrfVerificationKey},
};

/// A validator that won at least one sortition unit for a `(height, round)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderCandidate {
    /// candidate id
    pub node_id: NodeId,
    /// VRF key the proof verifies against
    pub verification_key: VrfVerificationKey,
    /// VRF proof over the view seed
    pub vrf_proof: VrfProof,
    /// VRF output for the view seed
    pub vrf_output: VrfOutput,
    /// Number of sortition units won
    pub sortition_result: u64,
}

/// A signed announcement of the VRF key a validator uses for `[start_height, end_height)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfKeyAnnouncement {
    /// owner
    pub node_id: NodeId,
    /// announced key
    pub vrf_verification_key: VrfVerificationKey,
    /// first height the key is valid at
    pub start_height: Height,
    /// first height the key is no longer valid at
    pub end_height: Height,
    /// owner's ed25519 signature over the fields above
    pub signature: Signature,
}

impl VrfKeyAnnouncement {
    /// Sign a new announcement
    ///
    /// # Errors
    /// If the fields cannot be encoded
    pub fn new(
        node_id: NodeId,
        keys: &SignatureKeyPair,
        vrf_verification_key: VrfVerificationKey,
        start_height: Height,
        end_height: Height,
    ) -> Result<Self, HotPoktError> {
        let bytes = Self::signable(node_id, &vrf_verification_key, start_height, end_height)?;
        Ok(Self {
            node_id,
            vrf_verification_key,
            start_height,
            end_height,
            signature: keys.sign(&bytes),
        })
    }

    /// Whether `public_key` signed this announcement
    #[must_use]
    pub fn is_signed_by(&self, public_key: &PublicKey) -> bool {
        Self::signable(
            self.node_id,
            &self.vrf_verification_key,
            self.start_height,
            self.end_height,
        )
        .is_ok_and(|bytes| verify_signature(public_key, &bytes, &self.signature))
    }

    /// Whether the key may be used at `height`
    #[must_use]
    pub fn covers(&self, height: Height) -> bool {
        self.start_height <= height && height < self.end_height
    }

    /// The signed projection
    fn signable(
        node_id: NodeId,
        key: &VrfVerificationKey,
        start_height: Height,
        end_height: Height,
    ) -> Result<Vec<u8>, HotPoktError> {
        bincode::serialize(&(node_id, key, start_height, end_height))
            .map_err(|e| HotPoktError::FailedToSerialize(e.to_string()))
    }
}

/// Leader election gossip
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderElectionMessage {
    /// a validator rotated its VRF key
    VrfKeyBroadcast(VrfKeyAnnouncement),
    /// a validator is a leader candidate for `(height, round)`
    VrfProofBroadcast {
        /// height of the candidacy
        height: Height,
        /// round of the candidacy
        round: Round,
        /// the candidacy
        candidate: LeaderCandidate,
    },
}
