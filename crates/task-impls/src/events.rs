// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::fmt::Display;

use hotpokt_task::task::TaskEvent;
use hotpokt_types::{
    message::ConsensusMessage,
    view::{Height, Round, View},
};

impl TaskEvent for ConsensusEvent {
    fn shutdown_event() -> Self {
        ConsensusEvent::Shutdown
    }
}

/// All of the possible events that can be passed between tasks
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum ConsensusEvent {
    /// An envelope addressed to this node was decoded
    MessageRecv(ConsensusMessage),
    /// The view timer armed for `view` expired
    Timeout {
        /// view the timer was armed in
        view: View,
        /// identifies the arming, stale timers carry an older value
        epoch: u64,
    },
    /// The minimum block interval elapsed and the leader of `(height, round)` may propose
    ProposeReady {
        /// height of the pending proposal
        height: Height,
        /// round of the pending proposal
        round: Round,
    },
    /// Shutdown the task
    Shutdown,
}

impl Display for ConsensusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusEvent::MessageRecv(message) => write!(f, "MessageRecv({})", message.kind()),
            ConsensusEvent::Timeout { view, epoch } => {
                write!(f, "Timeout(view={view}, epoch={epoch})")
            }
            ConsensusEvent::ProposeReady { height, round } => {
                write!(f, "ProposeReady(height={height}, round={round})")
            }
            ConsensusEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}
