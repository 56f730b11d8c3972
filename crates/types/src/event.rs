// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Events that a node will emit on its output stream

use serde::{Deserialize, Serialize};

use crate::{
    block::Block,
    validator::NodeId,
    view::{Height, Round, Step, View},
};

/// The node's position and leader, as reported by `PrintNodeState`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// reporting node
    pub node_id: NodeId,
    /// current height
    pub height: Height,
    /// current round
    pub round: Round,
    /// current step
    pub step: Step,
    /// whether this node leads the current view
    pub is_leader: bool,
    /// elected leader, if any
    pub leader_id: Option<NodeId>,
}

impl NodeState {
    /// The reported view
    #[must_use]
    pub fn view(&self) -> View {
        View::new(self.height, self.round, self.step)
    }
}

/// Observable progress of a node
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// The node moved to a new view
    ViewChanged {
        /// the new view
        view: View,
    },
    /// The node announced a new round to the network
    NewRoundBroadcast {
        /// the announced view
        view: View,
    },
    /// A leader was elected for the current view
    LeaderElected {
        /// view elected for
        view: View,
        /// the leader
        leader: NodeId,
    },
    /// No leader could be elected for the current view
    Leaderless {
        /// the leaderless view
        view: View,
    },
    /// The current round was abandoned without a commit
    RoundInterrupted {
        /// the view the round was abandoned in
        view: View,
        /// what went wrong
        reason: String,
    },
    /// The view timer fired
    Timeout {
        /// the view that timed out
        view: View,
    },
    /// A block was committed
    BlockCommitted {
        /// the committed block
        block: Block,
    },
    /// Answer to a `PrintNodeState` command
    NodeState(NodeState),
}
