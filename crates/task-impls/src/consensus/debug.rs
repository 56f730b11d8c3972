// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use anyhow::Result;
use hotpokt_types::{
    event::{Event, NodeState},
    message::DebugMessage,
    view::View,
    vrf::VrfSecretKey,
};
use tracing::info;

use super::ConsensusTaskState;
use crate::helpers::{broadcast_event, cancel_task};

impl ConsensusTaskState {
    /// Operator commands
    pub(super) async fn handle_debug_message(&mut self, command: DebugMessage) -> Result<()> {
        match command {
            DebugMessage::ResetToGenesis => self.reset_to_genesis().await,
            DebugMessage::PrintNodeState => {
                self.print_node_state().await;
                Ok(())
            }
            DebugMessage::TriggerNextView => self.trigger_next_view().await,
            DebugMessage::TogglePacemakerManualMode => {
                let manual = !self.pacemaker.is_manual();
                info!("Pacemaker manual mode is now {}", if manual { "on" } else { "off" });
                self.pacemaker.set_manual_mode(manual);
                Ok(())
            }
            DebugMessage::TriggerDkg => {
                self.dkg.trigger();
                Ok(())
            }
        }
    }

    /// Forget everything since genesis. Running it twice leaves the same state as once.
    async fn reset_to_genesis(&mut self) -> Result<()> {
        info!("Resetting to genesis");
        self.state.reset_to_genesis();
        self.pacemaker.reset();
        self.election.reset();
        self.chain_writer.reset_to_genesis();
        self.vrf_key = VrfSecretKey::derive(&self.key_pair.private_key_bytes(), 0);
        self.pending_proposal = None;
        for task in self.spawned_tasks.drain(..) {
            cancel_task(task).await;
        }
        broadcast_event(
            Event::ViewChanged {
                view: View::GENESIS,
            },
            &self.output_event_stream,
        )
        .await;
        Ok(())
    }

    /// Report the current view and leader
    async fn print_node_state(&self) {
        let view = self.state.view;
        let state = NodeState {
            node_id: self.node_id,
            height: view.height,
            round: view.round,
            step: view.step,
            is_leader: self.is_leader(),
            leader_id: self.state.leader_id,
        };
        info!(
            "Node state: height {} round {} step {} leader {:?}",
            state.height, state.round, state.step, state.leader_id
        );
        broadcast_event(Event::NodeState(state), &self.output_event_stream).await;
    }

    /// Move to the next view now.
    ///
    /// A view held back by manual mode is announced as is. Otherwise genesis starts the first
    /// height and any other view abandons its round.
    async fn trigger_next_view(&mut self) -> Result<()> {
        let change = if self.pacemaker.has_parked_view() {
            self.pacemaker.force_next_view(&mut self.state)
        } else {
            let change = if self.state.view.height == 0 {
                self.pacemaker.new_height(&mut self.state)
            } else {
                self.interrupt_round("next view was triggered").await;
                self.pacemaker.next_round(&mut self.state)
            };
            if self.pacemaker.is_manual() {
                self.pacemaker.force_next_view(&mut self.state)
            } else {
                change
            }
        };
        self.apply_view_change(change).await
    }
}
