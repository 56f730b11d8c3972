// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use anyhow::Result;
use hotpokt_types::{
    error::HotPoktError,
    message::{HotstuffMessage, MessageType},
    view::{Step, View},
};
use tracing::{debug, warn};

use super::{validation, ConsensusTaskState};
use crate::pacemaker::ViewDriver;

impl ConsensusTaskState {
    /// Replica side of the state machine
    pub(super) async fn handle_replica_message(&mut self, message: &HotstuffMessage) -> Result<()> {
        if message.msg_type == MessageType::Vote {
            debug!("Replica ignores vote from {}", message.sender);
            return Ok(());
        }
        match message.step {
            // announcements only count towards the quorum that elects the leader
            Step::NewRound => Ok(()),
            Step::Prepare => self.on_prepare_proposal(message).await,
            Step::PreCommit | Step::Commit | Step::Decide => {
                self.on_justified_proposal(message).await
            }
        }
    }

    /// Check, apply and vote for the leader's block
    async fn on_prepare_proposal(&mut self, message: &HotstuffMessage) -> Result<()> {
        let Some(leader) = self.state.leader_id else {
            warn!("Proposal from {} in a leaderless round", message.sender);
            return Ok(());
        };
        if message.sender != leader {
            warn!("Proposal from {} but the leader is {leader}", message.sender);
            return Ok(());
        }
        let snapshot = self.chain.snapshot();
        let view = self.state.view;

        let checked = validation::validate_proposal(
            message,
            self.state.locked_qc.as_ref(),
            &snapshot.validators,
        )
        .and_then(|()| {
            let block = message
                .block
                .as_ref()
                .ok_or_else(|| HotPoktError::InvalidProposal("no block".to_string()))?;
            validation::validate_block(
                block,
                view.height,
                &snapshot.latest_block_hash,
                Some(leader),
            )?;
            Ok(block.clone())
        });
        let block = match checked {
            Ok(block) => block,
            Err(e) => {
                warn!("Rejecting proposal from {leader}: {e}");
                self.interrupt_round("invalid proposal").await;
                return Ok(());
            }
        };
        if let Err(e) = self.deliver_block(&block) {
            warn!("Utility rejected block {}: {e:#}", block.hash());
            self.interrupt_round("block could not be applied").await;
            return Ok(());
        }

        self.state.block = Some(block.clone());
        self.state.view.step = Step::PreCommit;
        self.pacemaker.restart_timer(self.state.view);
        self.send_vote(View::new(view.height, view.round, Step::Prepare), block, leader)
            .await
    }

    /// `PreCommit`, `Commit` and `Decide` proposals, each carrying the QC of the previous phase
    async fn on_justified_proposal(&mut self, message: &HotstuffMessage) -> Result<()> {
        let Some(leader) = self.state.leader_id else {
            warn!("{} proposal from {} in a leaderless round", message.step, message.sender);
            return Ok(());
        };
        if leader != message.sender {
            warn!("{} proposal from {}, who is not the leader", message.step, message.sender);
            return Ok(());
        }
        let validators = self.chain.validators();
        let qc = match validation::validate_step_qc(message, self.state.block.as_ref(), &validators)
        {
            Ok(qc) => qc.clone(),
            Err(e) => {
                warn!("Rejecting {} proposal from {}: {e}", message.step, message.sender);
                self.interrupt_round("invalid justification").await;
                return Ok(());
            }
        };
        let view = self.state.current_view();
        let block = qc.block.clone();

        let next = match message.step {
            Step::PreCommit => {
                self.state.high_prepare_qc = Some(qc);
                Step::Commit
            }
            Step::Commit => {
                self.state.locked_qc = Some(qc);
                Step::Decide
            }
            _ => return self.commit_and_advance(&block).await,
        };
        self.state.view.step = next;
        self.pacemaker.restart_timer(self.state.view);
        self.send_vote(
            View::new(view.height, view.round, message.step),
            block,
            leader,
        )
        .await
    }
}
