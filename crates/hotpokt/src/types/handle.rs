// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Provides an event-streaming handle for a [`SystemContext`] running in the background

use std::sync::Arc;

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_lock::RwLock;
use hotpokt_task::task::ConsensusTaskRegistry;
use hotpokt_task_impls::{events::ConsensusEvent, helpers::broadcast_event};
use hotpokt_types::{
    error::HotPoktError,
    message::ConsensusMessage,
    validator::{ChainSnapshot, NodeId},
};

use crate::{types::Event, SystemContext};

/// Event streaming handle for a [`SystemContext`] instance running in the background
///
/// This type provides the means to message and interact with a background [`SystemContext`] instance,
/// allowing the ability to receive [`Event`]s from it and to feed it network envelopes.
#[derive(Clone)]
pub struct SystemContextHandle {
    /// The [sender](Sender) and an `InactiveReceiver` to keep the channel open.
    /// The Channel will output all the events.  Subscribers will get an activated
    /// clone of the `Receiver` when they get output stream.
    pub(crate) output_event_stream: (Sender<Event>, InactiveReceiver<Event>),

    /// access to the internal event stream, in case we need to, say, shut something down
    pub(crate) internal_event_stream: (
        Sender<Arc<ConsensusEvent>>,
        InactiveReceiver<Arc<ConsensusEvent>>,
    ),

    /// registry for controlling tasks
    pub(crate) registry: Arc<RwLock<ConsensusTaskRegistry<ConsensusEvent>>>,

    /// Internal reference to the underlying [`SystemContext`]
    pub hotpokt: Arc<SystemContext>,
}

impl SystemContextHandle {
    /// obtains a stream to expose to the user
    #[must_use]
    pub fn get_event_stream(&self) -> Receiver<Event> {
        self.output_event_stream.1.activate_cloned()
    }

    /// The entry point for envelopes delivered by the network.
    ///
    /// The envelope is decoded and queued for the consensus task.
    ///
    /// # Errors
    /// [`HotPoktError::FailedToDeserialize`] if `envelope` does not decode. Protocol level
    /// problems with a decoded message are never reported here.
    pub async fn dispatch(&self, envelope: &[u8]) -> Result<(), HotPoktError> {
        let message = ConsensusMessage::decode(envelope)?;
        self.dispatch_message(message).await;
        Ok(())
    }

    /// Queue an already decoded message for the consensus task
    pub async fn dispatch_message(&self, message: ConsensusMessage) {
        broadcast_event(
            Arc::new(ConsensusEvent::MessageRecv(message)),
            &self.internal_event_stream.0,
        )
        .await;
    }

    /// This node's id
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.hotpokt.node_id
    }

    /// The latest committed chain snapshot
    #[must_use]
    pub fn chain_snapshot(&self) -> Arc<ChainSnapshot> {
        self.hotpokt.chain().snapshot()
    }

    /// Shut down the consensus task and wait until it has stopped.
    pub async fn shut_down(&self) {
        broadcast_event(
            Arc::new(ConsensusEvent::Shutdown),
            &self.internal_event_stream.0,
        )
        .await;
        self.registry.write().await.shutdown().await;
    }
}
