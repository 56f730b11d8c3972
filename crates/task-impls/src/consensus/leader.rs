// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::sync::Arc;

use anyhow::Result;
use hotpokt_types::{
    block::Block,
    error::HotPoktError,
    message::{ConsensusMessage, HotstuffMessage, MessageType},
    view::{Height, Round, Step, View},
};
use tokio::{spawn, time::sleep};
use tracing::{debug, error, info};

use super::ConsensusTaskState;
use crate::{
    events::ConsensusEvent,
    helpers::broadcast_event,
    quorum::{find_high_qc, form_qc, is_byzantine_quorum},
};

impl ConsensusTaskState {
    /// Leader side of the state machine
    pub(super) async fn handle_leader_message(&mut self, message: &HotstuffMessage) -> Result<()> {
        match message.step {
            Step::NewRound => self.on_new_round_quorum().await,
            Step::Prepare | Step::PreCommit | Step::Commit => {
                if message.msg_type == MessageType::Vote {
                    self.on_vote(message.step).await
                } else {
                    Ok(())
                }
            }
            Step::Decide => {
                debug!("Leader ignores {} from {}", message.step, message.sender);
                Ok(())
            }
        }
    }

    /// Propose once a quorum announced the round, waiting out the minimum block interval first.
    pub(super) async fn on_new_round_quorum(&mut self) -> Result<()> {
        let view = self.state.view;
        if view.step != Step::NewRound
            || self.pending_proposal == Some((view.height, view.round))
        {
            return Ok(());
        }
        let validators = self.chain.validators();
        let announced = self
            .state
            .pool
            .count_for(Step::NewRound, view.height, view.round);
        if !is_byzantine_quorum(announced, validators.len()) {
            return Ok(());
        }

        match self.pacemaker.remaining_block_interval() {
            Some(remaining) => {
                debug!("Delaying proposal for {view} by {remaining:?}");
                self.pending_proposal = Some((view.height, view.round));
                let stream = self.internal_event_stream.clone();
                let (height, round) = (view.height, view.round);
                self.spawned_tasks.retain(|task| !task.is_finished());
                self.spawned_tasks.push(spawn(async move {
                    sleep(remaining).await;
                    broadcast_event(Arc::new(ConsensusEvent::ProposeReady { height, round }), &stream)
                        .await;
                }));
                Ok(())
            }
            None => self.propose_block().await,
        }
    }

    /// A delayed proposal is due
    pub(super) async fn on_propose_ready(&mut self, height: Height, round: Round) -> Result<()> {
        if self.pending_proposal != Some((height, round)) {
            return Ok(());
        }
        self.pending_proposal = None;
        let view = self.state.view;
        if view.height != height
            || view.round != round
            || view.step != Step::NewRound
            || !self.is_leader()
        {
            debug!("Dropping delayed proposal for ({height}, {round}), now at {view}");
            return Ok(());
        }
        self.propose_block().await
    }

    /// Broadcast a `Prepare` proposal, reusing the block of the highest prepare QC when it is
    /// for this height, and vote for it ourselves.
    async fn propose_block(&mut self) -> Result<()> {
        let view = self.state.view;
        let snapshot = self.chain.snapshot();
        let high_qc = find_high_qc(
            self.state
                .pool
                .messages_for(Step::NewRound, view.height, view.round),
            &snapshot.validators,
        );

        let block = match &high_qc {
            Some(qc) if qc.height >= view.height => {
                info!("Re-proposing block {} justified at round {}", qc.block.hash(), qc.round);
                qc.block.clone()
            }
            _ => Block::new(
                view.height,
                snapshot.latest_block_hash,
                self.node_id,
                self.utility.reap_mempool(),
                vec![],
            ),
        };

        if let Err(e) = self.deliver_block(&block) {
            error!("Could not apply own block at height {}: {e:#}", view.height);
            self.interrupt_round("own block was rejected").await;
            return Ok(());
        }

        let prepare = View::new(view.height, view.round, Step::Prepare);
        info!(
            "Proposing block {} with {} transactions at {prepare}",
            block.hash(),
            block.transactions.len()
        );
        self.state.block = Some(block.clone());
        self.state.view.step = Step::Prepare;
        let proposal = HotstuffMessage::proposal(self.node_id, prepare, block.clone(), high_qc)
            .signed(&self.key_pair)?;
        self.broadcast(ConsensusMessage::Hotstuff(proposal)).await?;
        self.pacemaker.restart_timer(prepare);
        self.send_vote(prepare, block, self.node_id).await
    }

    /// Aggregate the votes of `step` and drive the next phase.
    async fn on_vote(&mut self, step: Step) -> Result<()> {
        let view = self.state.view;
        if view.step != step {
            return Ok(());
        }
        let Some(block) = self.state.block.clone() else {
            return Ok(());
        };
        let validators = self.chain.validators();
        let qc = match form_qc(&self.state.pool, view, &block, &validators) {
            Ok(qc) => qc,
            Err(HotPoktError::ThresholdNotMet { .. }) => return Ok(()),
            Err(e) => {
                self.interrupt_round(&format!("could not form a QC: {e}")).await;
                return Ok(());
            }
        };

        let next = match step {
            Step::Prepare => {
                self.state.high_prepare_qc = Some(qc.clone());
                Step::PreCommit
            }
            Step::PreCommit => {
                self.state.locked_qc = Some(qc.clone());
                Step::Commit
            }
            _ => Step::Decide,
        };
        let next_view = View::new(view.height, view.round, next);
        debug!("Formed {step} QC for block {}, moving to {next}", block.hash());
        self.state.view = next_view;
        let proposal = HotstuffMessage::proposal(self.node_id, next_view, block.clone(), Some(qc))
            .signed(&self.key_pair)?;
        self.broadcast(ConsensusMessage::Hotstuff(proposal)).await?;

        if next == Step::Decide {
            return self.commit_and_advance(&block).await;
        }
        self.pacemaker.restart_timer(next_view);
        self.send_vote(next_view, block, self.node_id).await
    }
}
