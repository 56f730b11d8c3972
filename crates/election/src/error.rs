// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Errors raised by leader election

use hotpokt_types::{
    validator::NodeId,
    view::{Height, Round},
};
use thiserror::Error;

/// Error type for leader election
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ElectionError {
    /// No candidate survived verification
    #[error("no leader for height {height} round {round}")]
    NoLeader {
        /// height of the election
        height: Height,
        /// round of the election
        round: Round,
    },
    /// The validator set is empty
    #[error("the validator set is empty")]
    EmptyValidatorSet,
    /// A message came from a node outside the validator set
    #[error("node {0} is not a validator")]
    UnknownValidator(NodeId),
    /// An announcement's signature did not verify
    #[error("VRF key announcement from {0} is not signed by it")]
    BadKeySignature(NodeId),
    /// An announcement's validity range is empty
    #[error("VRF key announcement from {node_id} covers no heights ({start}..{end})")]
    EmptyKeyRange {
        /// announcer
        node_id: NodeId,
        /// first valid height
        start: Height,
        /// first invalid height
        end: Height,
    },
    /// An announcement starts at a height that is already committed
    #[error("VRF key announcement from {node_id} starts at {start}, chain is at {latest}")]
    StaleKeyAnnouncement {
        /// announcer
        node_id: NodeId,
        /// first valid height
        start: Height,
        /// latest committed height
        latest: Height,
    },
    /// A different key was already announced for the same start height
    #[error("{node_id} already announced a VRF key starting at {start}")]
    KeyAlreadyAnnounced {
        /// announcer
        node_id: NodeId,
        /// first valid height
        start: Height,
    },
    /// The validator already holds as many live keys as allowed
    #[error("{node_id} already holds {limit} VRF keys")]
    TooManyKeys {
        /// announcer
        node_id: NodeId,
        /// live keys allowed per validator
        limit: usize,
    },
    /// A candidacy does not verify against the key known for its node
    #[error("candidacy of {0} does not verify")]
    InvalidCandidate(NodeId),
}
