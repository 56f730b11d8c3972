// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Network message types
//!
//! Everything travelling between nodes is a [`ConsensusMessage`], encoded into an opaque byte
//! envelope with [`ConsensusMessage::encode`]. The HotStuff payload itself is a
//! [`HotstuffMessage`].

use serde::{Deserialize, Serialize};

use crate::{
    block::Block,
    election::LeaderElectionMessage,
    error::HotPoktError,
    signature_key::{Signature, SignatureKeyPair},
    validator::NodeId,
    view::{Height, Round, Step, View},
};

/// Whether a message is a leader's proposal or a replica's vote
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// leader to replicas, or a replica announcing a new round
    Propose,
    /// replica to leader
    Vote,
}

/// One replica's signature over the signable projection of a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    /// signer
    pub node_id: NodeId,
    /// ed25519 signature over [`signable_bytes`]
    pub signature: Signature,
}

/// The set of signatures backing a QC.
///
/// Only the naive variant is produced today. Verification of the aggregated variant is
/// rejected until an aggregate scheme is wired in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdSignature {
    /// each partial signature kept individually
    Naive(Vec<PartialSignature>),
    /// an aggregated BLS signature
    Bls(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl ThresholdSignature {
    /// Pack partial signatures into a threshold signature
    #[must_use]
    pub fn from_partials(partials: Vec<PartialSignature>) -> Self {
        Self::Naive(partials)
    }
}

/// Agreement of a Byzantine quorum on `(height, round, step, block)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// height voted on
    pub height: Height,
    /// round voted on
    pub round: Round,
    /// step the votes were cast in
    pub step: Step,
    /// block voted for
    pub block: Block,
    /// the votes
    pub threshold_signature: ThresholdSignature,
}

impl QuorumCertificate {
    /// The bytes every partial signature in this QC signs
    ///
    /// # Errors
    /// If the block cannot be encoded
    pub fn signable_bytes(&self) -> Result<Vec<u8>, HotPoktError> {
        signable_bytes(self.step, self.height, self.round, Some(&self.block))
    }
}

/// The HotStuff payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotstuffMessage {
    /// proposal or vote
    pub msg_type: MessageType,
    /// step this message belongs to
    pub step: Step,
    /// height this message belongs to
    pub height: Height,
    /// round this message belongs to
    pub round: Round,
    /// block proposed or voted for
    pub block: Option<Block>,
    /// set on leader proposals and `NewRound` announcements
    pub justify_qc: Option<QuorumCertificate>,
    /// the sender's signature; set on every message a node sends
    pub partial_sig: Option<PartialSignature>,
    /// originating node
    pub sender: NodeId,
}

impl HotstuffMessage {
    /// The view this message is tagged with
    #[must_use]
    pub fn view(&self) -> View {
        View::new(self.height, self.round, self.step)
    }

    /// A `NewRound` announcement carrying the sender's highest prepare QC
    #[must_use]
    pub fn new_round(
        sender: NodeId,
        height: Height,
        round: Round,
        justify_qc: Option<QuorumCertificate>,
    ) -> Self {
        Self {
            msg_type: MessageType::Propose,
            step: Step::NewRound,
            height,
            round,
            block: None,
            justify_qc,
            partial_sig: None,
            sender,
        }
    }

    /// A leader proposal for `view`
    #[must_use]
    pub fn proposal(
        sender: NodeId,
        view: View,
        block: Block,
        justify_qc: Option<QuorumCertificate>,
    ) -> Self {
        Self {
            msg_type: MessageType::Propose,
            step: view.step,
            height: view.height,
            round: view.round,
            block: Some(block),
            justify_qc,
            partial_sig: None,
            sender,
        }
    }

    /// A signed vote for `block` in `view`
    ///
    /// # Errors
    /// If the block cannot be encoded for signing
    pub fn vote(
        sender: NodeId,
        keys: &SignatureKeyPair,
        view: View,
        block: Block,
    ) -> Result<Self, HotPoktError> {
        let bytes = signable_bytes(view.step, view.height, view.round, Some(&block))?;
        Ok(Self {
            msg_type: MessageType::Vote,
            step: view.step,
            height: view.height,
            round: view.round,
            block: Some(block),
            justify_qc: None,
            partial_sig: Some(PartialSignature {
                node_id: sender,
                signature: keys.sign(&bytes),
            }),
            sender,
        })
    }

    /// Sign a proposal or `NewRound` announcement as its sender
    ///
    /// # Errors
    /// If the block cannot be encoded for signing
    pub fn signed(mut self, keys: &SignatureKeyPair) -> Result<Self, HotPoktError> {
        let bytes = self.signable_bytes()?;
        self.partial_sig = Some(PartialSignature {
            node_id: self.sender,
            signature: keys.sign(&bytes),
        });
        Ok(self)
    }

    /// The bytes the partial signature of this message covers
    ///
    /// # Errors
    /// If the block cannot be encoded
    pub fn signable_bytes(&self) -> Result<Vec<u8>, HotPoktError> {
        signable_bytes(self.step, self.height, self.round, self.block.as_ref())
    }
}

/// Canonical bytes for `(step, height, round, block)`.
///
/// # Errors
/// If the block cannot be encoded
pub fn signable_bytes(
    step: Step,
    height: Height,
    round: Round,
    block: Option<&Block>,
) -> Result<Vec<u8>, HotPoktError> {
    bincode::serialize(&(step, height, round, block))
        .map_err(|e| HotPoktError::FailedToSerialize(e.to_string()))
}

/// Debug commands an operator can send to a node
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugMessage {
    /// zero the view and every QC, keeping the configuration
    ResetToGenesis,
    /// emit the node's view on the output stream
    PrintNodeState,
    /// start the next view now
    TriggerNextView,
    /// flip between automatic and manual pacemaker
    TogglePacemakerManualMode,
    /// start distributed key generation (inactive)
    TriggerDkg,
}

/// One of the four rounds of the key generation protocol
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DkgRound {
    /// commitments
    Round1,
    /// shares
    Round2,
    /// complaints
    Round3,
    /// justifications
    Round4,
}

/// A key generation protocol message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgMessage {
    /// round this payload belongs to
    pub round: DkgRound,
    /// sender
    pub sender: NodeId,
    /// opaque payload
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Block sync traffic, owned by the state sync collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSyncMessage {
    /// ask a peer for a block
    BlockRequest {
        /// requester
        sender: NodeId,
        /// height wanted
        height: Height,
    },
    /// answer a block request
    BlockResponse {
        /// responder
        sender: NodeId,
        /// the block
        block: Block,
    },
}

/// The typed envelope routed by [`ConsensusMessage`] tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// HotStuff protocol traffic
    Hotstuff(HotstuffMessage),
    /// Operator commands
    Debug(DebugMessage),
    /// Key generation traffic
    Dkg(DkgMessage),
    /// VRF key and candidacy gossip
    LeaderElection(LeaderElectionMessage),
    /// Block sync traffic
    StateSync(StateSyncMessage),
    /// A raw transaction for the mempool
    Transaction(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl ConsensusMessage {
    /// Encode into an opaque envelope
    ///
    /// # Errors
    /// If serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, HotPoktError> {
        bincode::serialize(self).map_err(|e| HotPoktError::FailedToSerialize(e.to_string()))
    }

    /// Decode an envelope
    ///
    /// # Errors
    /// If the bytes are not a valid envelope
    pub fn decode(bytes: &[u8]) -> Result<Self, HotPoktError> {
        bincode::deserialize(bytes).map_err(|e| HotPoktError::FailedToDeserialize(e.to_string()))
    }

    /// Short tag name, used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Hotstuff(_) => "hotstuff",
            ConsensusMessage::Debug(_) => "debug",
            ConsensusMessage::Dkg(_) => "dkg",
            ConsensusMessage::LeaderElection(_) => "leader_election",
            ConsensusMessage::StateSync(_) => "state_sync",
            ConsensusMessage::Transaction(_) => "transaction",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{block::BlockHash, signature_key::verify_signature};

    #[test]
    fn votes_sign_the_view_and_block() {
        let keys = SignatureKeyPair::generated_from_seed_indexed([1; 32], 1);
        let block = Block::new(2, BlockHash::GENESIS, NodeId(1), vec![], vec![]);
        let vote = HotstuffMessage::vote(NodeId(1), &keys, View::new(2, 0, Step::Prepare), block)
            .unwrap();
        let partial = vote.partial_sig.clone().unwrap();
        let bytes = vote.signable_bytes().unwrap();
        assert!(verify_signature(&keys.public_key(), &bytes, &partial.signature));

        let mut moved = vote.clone();
        moved.round = 1;
        let other_bytes = moved.signable_bytes().unwrap();
        assert!(!verify_signature(&keys.public_key(), &other_bytes, &partial.signature));
    }

    #[test]
    fn announcements_are_signed_by_their_sender() {
        let keys = SignatureKeyPair::generated_from_seed_indexed([1; 32], 3);
        let announcement = HotstuffMessage::new_round(NodeId(3), 4, 2, None)
            .signed(&keys)
            .unwrap();
        let partial = announcement.partial_sig.clone().unwrap();
        assert_eq!(partial.node_id, NodeId(3));
        let bytes = announcement.signable_bytes().unwrap();
        assert!(verify_signature(&keys.public_key(), &bytes, &partial.signature));
    }

    #[test]
    fn envelopes_decode_to_the_same_message() {
        let message = ConsensusMessage::Hotstuff(HotstuffMessage::new_round(NodeId(3), 1, 0, None));
        let bytes = message.encode().unwrap();
        assert_eq!(ConsensusMessage::decode(&bytes).unwrap(), message);
        assert!(ConsensusMessage::decode(&[0xff, 0xff]).is_err());
    }
}
