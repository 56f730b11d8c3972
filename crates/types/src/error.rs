// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Error type for `HotPokt`
//!
//! This module provides [`HotPoktError`], which is an enum representing possible faults that can
//! occur while interacting with this crate.

use thiserror::Error;

use crate::{validator::NodeId, view::View};

/// Error type for `HotPokt`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HotPoktError {
    /// The consensus state machine is in an invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failed to serialize data
    #[error("Failed to serialize: {0}")]
    FailedToSerialize(String),

    /// Failed to deserialize data
    #[error("Failed to deserialize: {0}")]
    FailedToDeserialize(String),

    /// A QC failed verification
    #[error("Invalid quorum certificate: {0}")]
    InvalidQuorumCertificate(String),

    /// A proposal failed safety checks
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    /// A block failed validation
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Not enough valid votes to form a QC
    #[error("Byzantine threshold not met: {received} of {validators} validators")]
    ThresholdNotMet {
        /// votes counted
        received: usize,
        /// validator set size
        validators: usize,
    },

    /// A signer is not a member of the validator set
    #[error("Unknown validator {0}")]
    UnknownValidator(NodeId),

    /// A vote carries a missing, misattributed or forged partial signature
    #[error("Invalid partial signature from {0}")]
    InvalidPartialSignature(NodeId),

    /// Nothing could be elected for a view
    #[error("No leader for view {0}")]
    NoLeader(View),

    /// The signature scheme is not supported yet
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A collaborator reported a failure
    #[error("Collaborator {collaborator} failed: {reason}")]
    Collaborator {
        /// which collaborator
        collaborator: &'static str,
        /// what it said
        reason: String,
    },
}
