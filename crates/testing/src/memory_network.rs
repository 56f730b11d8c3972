// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! In memory network simulator
//!
//! This module provides an in-memory only simulation of an actual network, useful for unit and
//! integration tests.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use hotpokt_types::{
    message::ConsensusMessage,
    traits::{ConnectedNetwork, NetworkError},
    validator::NodeId,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

/// An envelope that went through the network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEnvelope {
    /// sending node
    pub from: NodeId,
    /// `None` for a broadcast
    pub to: Option<NodeId>,
    /// the encoded message
    pub bytes: Vec<u8>,
}

impl SentEnvelope {
    /// Decode the carried message
    #[must_use]
    pub fn message(&self) -> Option<ConsensusMessage> {
        ConsensusMessage::decode(&self.bytes).ok()
    }
}

/// Whether envelopes flow, and what is waiting while they do not
#[derive(Debug, Default)]
struct Delivery {
    /// envelopes are held instead of delivered
    paused: bool,
    /// held `(recipient, bytes)` pairs in send order
    held: Vec<(NodeId, Vec<u8>)>,
    /// everything ever sent
    log: Vec<SentEnvelope>,
}

/// Shared state for in-memory mock networking.
///
/// This type is responsible for keeping track of the channels to each [`MemoryNetwork`], and is
/// used to group the [`MemoryNetwork`] instances.
#[derive(Debug, Default)]
pub struct MasterMap {
    /// inbound channel of every attached node
    map: DashMap<NodeId, UnboundedSender<Vec<u8>>>,
    /// delivery switch, held envelopes and the send log. Every send takes this lock so the
    /// per sender order survives a pause.
    delivery: Mutex<Delivery>,
}

impl MasterMap {
    /// Create a new, empty, `MasterMap`
    #[must_use]
    pub fn new() -> Arc<MasterMap> {
        Arc::new(MasterMap::default())
    }

    /// Hold every envelope until [`MasterMap::resume`]
    pub fn pause(&self) {
        self.delivery.lock().paused = true;
    }

    /// Deliver held envelopes in send order and let new ones through
    pub fn resume(&self) {
        let mut delivery = self.delivery.lock();
        delivery.paused = false;
        for (recipient, bytes) in std::mem::take(&mut delivery.held) {
            self.deliver(recipient, bytes);
        }
    }

    /// Deliver the held envelopes matching `predicate` now, keeping the rest held
    pub fn release_where(&self, predicate: impl Fn(&ConsensusMessage) -> bool) {
        let mut delivery = self.delivery.lock();
        let (release, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut delivery.held)
            .into_iter()
            .partition(|(_, bytes)| {
                ConsensusMessage::decode(bytes).is_ok_and(|message| predicate(&message))
            });
        delivery.held = keep;
        for (recipient, bytes) in release {
            self.deliver(recipient, bytes);
        }
    }

    /// Every envelope sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentEnvelope> {
        self.delivery.lock().log.clone()
    }

    /// Number of envelopes waiting for [`MasterMap::resume`]
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.delivery.lock().held.len()
    }

    /// Route one envelope, logging it and honouring a pause
    fn route(&self, envelope: SentEnvelope) -> Result<(), NetworkError> {
        let recipients = match envelope.to {
            Some(node_id) => {
                if !self.map.contains_key(&node_id) {
                    return Err(NetworkError::NoSuchNode { node_id });
                }
                vec![node_id]
            }
            None => self.map.iter().map(|entry| *entry.key()).collect(),
        };
        let mut delivery = self.delivery.lock();
        for recipient in recipients {
            if delivery.paused {
                delivery.held.push((recipient, envelope.bytes.clone()));
            } else {
                self.deliver(recipient, envelope.bytes.clone());
            }
        }
        delivery.log.push(envelope);
        Ok(())
    }

    /// Push into the recipient's inbound channel
    fn deliver(&self, recipient: NodeId, bytes: Vec<u8>) {
        match self.map.get(&recipient) {
            Some(input) => {
                if input.send(bytes).is_err() {
                    warn!("Node {recipient} stopped receiving");
                } else {
                    trace!("Delivered message to {recipient}");
                }
            }
            None => warn!("Node {recipient} detached before delivery"),
        }
    }
}

/// In memory only network simulator.
///
/// Broadcasts reach every attached node, the sender included.
#[derive(Clone, Debug)]
pub struct MemoryNetwork {
    /// the attached node
    node_id: NodeId,
    /// The master map
    master_map: Arc<MasterMap>,
}

impl MemoryNetwork {
    /// Attach `node_id` to the group, returning its network and its inbound envelopes
    #[must_use]
    pub fn new(node_id: NodeId, master_map: &Arc<MasterMap>) -> (Self, UnboundedReceiver<Vec<u8>>) {
        let (input, output) = unbounded_channel();
        master_map.map.insert(node_id, input);
        (
            Self {
                node_id,
                master_map: Arc::clone(master_map),
            },
            output,
        )
    }
}

#[async_trait]
impl ConnectedNetwork for MemoryNetwork {
    async fn broadcast_message(&self, envelope: Vec<u8>) -> Result<(), NetworkError> {
        trace!("Broadcasting {} bytes from {}", envelope.len(), self.node_id);
        self.master_map.route(SentEnvelope {
            from: self.node_id,
            to: None,
            bytes: envelope,
        })
    }

    async fn send_message(&self, envelope: Vec<u8>, recipient: NodeId) -> Result<(), NetworkError> {
        self.master_map.route(SentEnvelope {
            from: self.node_id,
            to: Some(recipient),
            bytes: envelope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn broadcasts_reach_the_sender_and_pauses_hold_order() {
        let master = MasterMap::new();
        let (first, mut first_rx) = MemoryNetwork::new(NodeId(1), &master);
        let (_second, mut second_rx) = MemoryNetwork::new(NodeId(2), &master);

        first.broadcast_message(vec![1]).await.unwrap();
        assert_eq!(first_rx.recv().await, Some(vec![1]));
        assert_eq!(second_rx.recv().await, Some(vec![1]));

        master.pause();
        first.send_message(vec![2], NodeId(2)).await.unwrap();
        first.send_message(vec![3], NodeId(2)).await.unwrap();
        assert!(second_rx.try_recv().is_err());
        assert_eq!(master.held_count(), 2);

        master.resume();
        assert_eq!(second_rx.recv().await, Some(vec![2]));
        assert_eq!(second_rx.recv().await, Some(vec![3]));
        assert_eq!(master.sent().len(), 3);

        assert!(matches!(
            first.send_message(vec![4], NodeId(9)).await,
            Err(NetworkError::NoSuchNode { .. })
        ));
    }
}
