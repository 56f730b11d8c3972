// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Network access compatibility
//!
//! Contains the trait the consensus core uses to reach its peers. Envelopes are opaque bytes
//! produced by [`crate::message::ConsensusMessage::encode`]; transport and peer discovery live
//! behind the trait.

use std::fmt::Debug;

use async_trait::async_trait;
use snafu::Snafu;

use crate::validator::NodeId;

/// Error type for networking
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum NetworkError {
    /// Could not deliver a message to a specified recipient
    CouldNotDeliver,
    /// Attempted to deliver a message to an unknown node
    #[snafu(display("no such node {node_id}"))]
    NoSuchNode {
        /// the unknown recipient
        node_id: NodeId,
    },
    /// The network has been shut down and can no longer be used
    ShutDown,
}

/// The transport consensus sends through.
///
/// Implementations are expected to deliver broadcasts to every validator, the sender included,
/// and to deliver a direct message to the sender itself when it is the recipient.
#[async_trait]
pub trait ConnectedNetwork: Send + Sync + Debug + 'static {
    /// Send an envelope to every validator
    async fn broadcast_message(&self, envelope: Vec<u8>) -> Result<(), NetworkError>;

    /// Send an envelope to a single validator
    async fn send_message(&self, envelope: Vec<u8>, recipient: NodeId) -> Result<(), NetworkError>;
}
