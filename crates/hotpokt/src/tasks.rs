// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::sync::Arc;

use async_broadcast::{Receiver, Sender};
use hotpokt_election::LeaderElection;
use hotpokt_task::task::{ConsensusTaskRegistry, Task};
use hotpokt_task_impls::{
    consensus::{ConsensusTaskState, HotstuffState},
    dkg::DkgStub,
    events::ConsensusEvent,
    pacemaker::Pacemaker,
};
use hotpokt_types::{
    traits::Utility, validator::ChainWriter, view::Height, ValidatorConfig,
};

use crate::SystemContext;

/// Id the consensus task runs under
pub const CONSENSUS_TASK_ID: usize = 0;

/// What the consensus task owns beyond what [`SystemContext`] shares
pub struct ConsensusTaskParts {
    /// identity and signing keys
    pub validator_config: ValidatorConfig,
    /// height of the first view
    pub start_height: Height,
    /// the only writer of the chain snapshot
    pub chain_writer: ChainWriter,
    /// transaction execution
    pub utility: Arc<dyn Utility>,
}

impl ConsensusTaskParts {
    /// Assemble the consensus task state of `context`
    #[must_use]
    pub fn into_task_state(self, context: &SystemContext) -> ConsensusTaskState {
        let config = context.config.clone();
        let internal_tx = context.internal_event_stream.0.clone();
        let metrics = context.metrics();
        let node_id = self.validator_config.node_id;
        ConsensusTaskState {
            node_id,
            vrf_key: self.validator_config.genesis_vrf_key(),
            key_pair: self.validator_config.key_pair,
            state: HotstuffState::new(node_id, self.start_height, config.max_mempool_bytes),
            pacemaker: Pacemaker::new(
                config.pacemaker.clone(),
                internal_tx.clone(),
                Arc::clone(&metrics),
            ),
            election: LeaderElection::new(
                config.leader_election,
                config.num_expected_leaders,
                config.max_vrf_keys_per_validator(),
            ),
            chain: context.chain().clone(),
            chain_writer: self.chain_writer,
            network: Arc::clone(&context.network),
            utility: self.utility,
            output_event_stream: context.output_event_stream.0.clone(),
            internal_event_stream: internal_tx,
            pending_proposal: None,
            spawned_tasks: Vec::new(),
            dkg: DkgStub::default(),
            metrics,
            config,
        }
    }
}

/// Spawn the consensus task on the internal event bus
pub fn add_consensus_task(
    registry: &mut ConsensusTaskRegistry<ConsensusEvent>,
    state: ConsensusTaskState,
    sender: Sender<Arc<ConsensusEvent>>,
    receiver: Receiver<Arc<ConsensusEvent>>,
) {
    registry.run_task(Task::new(state, sender, receiver, CONSENSUS_TASK_ID));
}
