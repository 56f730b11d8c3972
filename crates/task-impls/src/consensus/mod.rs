// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{ensure, Context, Result};
use async_broadcast::{Receiver, Sender};
use async_trait::async_trait;
use hotpokt_election::LeaderElection;
use hotpokt_task::task::TaskState;
use hotpokt_types::{
    block::Block,
    config::ConsensusConfig,
    election::{LeaderElectionMessage, VrfKeyAnnouncement},
    event::Event,
    message::{ConsensusMessage, HotstuffMessage, MessageType, QuorumCertificate},
    signature_key::SignatureKeyPair,
    traits::{metrics::ConsensusMetricsValue, ConnectedNetwork, Utility},
    validator::{ChainView, ChainWriter, NodeId},
    view::{Height, Round, Step, View},
    vrf::VrfSecretKey,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::{
    dkg::DkgStub,
    events::ConsensusEvent,
    helpers::{broadcast_event, cancel_task},
    pacemaker::{Admission, CatchUp, Pacemaker, ViewChange, ViewDriver},
    pool::{MessagePool, PoolInsert},
    quorum::{honest_witness_threshold, is_byzantine_quorum, verify_qc},
};

/// Handlers for the node leading the round
mod leader;

/// Handlers for every other node
mod replica;

/// Operator commands
mod debug;

/// Proposal, block, vote and QC checks
pub mod validation;

/// The round local state of the HotStuff state machine
#[derive(Debug)]
pub struct HotstuffState {
    /// this node
    pub node_id: NodeId,
    /// current `(height, round, step)`
    pub view: View,
    /// block proposed or accepted at the current height
    pub block: Option<Block>,
    /// highest prepare QC seen at the current height
    pub high_prepare_qc: Option<QuorumCertificate>,
    /// QC this node is locked on at the current height
    pub locked_qc: Option<QuorumCertificate>,
    /// leader of the current round, once elected
    pub leader_id: Option<NodeId>,
    /// messages received in the current round
    pub pool: MessagePool,
    /// signed `NewRound` announcements for later views, the latest one per validator
    pub announcements: BTreeMap<NodeId, HotstuffMessage>,
}

impl HotstuffState {
    /// Fresh state at `height`
    #[must_use]
    pub fn new(node_id: NodeId, height: Height, max_pool_bytes: u64) -> Self {
        Self {
            node_id,
            view: View::new(height, 0, Step::NewRound),
            block: None,
            high_prepare_qc: None,
            locked_qc: None,
            leader_id: None,
            pool: MessagePool::new(max_pool_bytes),
            announcements: BTreeMap::new(),
        }
    }

    /// Back to `(0, 0, NewRound)` with nothing held
    pub fn reset_to_genesis(&mut self) {
        self.view = View::GENESIS;
        self.block = None;
        self.high_prepare_qc = None;
        self.locked_qc = None;
        self.leader_id = None;
        self.pool.clear();
        self.announcements.clear();
    }

    /// Keep a signed `NewRound` for a later view, the latest one per validator.
    ///
    /// Returns the latest view that at least `needed` validators announced at or beyond.
    pub fn hold_announcement(&mut self, message: HotstuffMessage, needed: usize) -> Option<View> {
        let newer = self
            .announcements
            .get(&message.sender)
            .map_or(true, |held| (held.height, held.round) < (message.height, message.round));
        if newer {
            self.announcements.insert(message.sender, message);
        }
        let mut views: Vec<_> = self
            .announcements
            .values()
            .map(|held| (held.height, held.round))
            .collect();
        views.sort_unstable_by(|a, b| b.cmp(a));
        let (height, round) = *views.get(needed.checked_sub(1)?)?;
        Some(View::new(height, round, Step::NewRound))
    }

    /// Move the announcements held for the current round into the pool, dropping older ones
    fn release_announcements(&mut self) {
        let current = (self.view.height, self.view.round);
        for (sender, message) in std::mem::take(&mut self.announcements) {
            match (message.height, message.round).cmp(&current) {
                Ordering::Less => {}
                Ordering::Equal => {
                    if self.pool.insert(message) != PoolInsert::Added {
                        debug!("Could not pool the held announcement of {sender}");
                    }
                }
                Ordering::Greater => {
                    self.announcements.insert(sender, message);
                }
            }
        }
    }
}

impl ViewDriver for HotstuffState {
    fn current_view(&self) -> View {
        self.view
    }

    fn advance_round(&mut self) {
        self.view.round = self.view.round.saturating_add(1);
    }

    fn advance_height(&mut self) {
        self.view = View::new(self.view.height.saturating_add(1), 0, Step::NewRound);
        self.block = None;
        self.high_prepare_qc = None;
        self.locked_qc = None;
    }

    fn reset_round(&mut self) {
        self.view.step = Step::NewRound;
        self.leader_id = None;
        self.pool.clear();
        self.release_announcements();
    }

    fn catch_up_round(&mut self, view: View) {
        if view.round != self.view.round {
            self.pool.clear();
        }
        self.view = view;
    }

    fn catch_up_height(&mut self, view: View) {
        self.view = view;
        self.block = None;
        self.high_prepare_qc = None;
        self.locked_qc = None;
        self.leader_id = None;
        self.pool.clear();
    }

    fn is_leader(&self) -> bool {
        self.leader_id == Some(self.node_id)
    }

    fn has_leader(&self) -> bool {
        self.leader_id.is_some()
    }

    fn high_prepare_qc(&self) -> Option<QuorumCertificate> {
        self.high_prepare_qc.clone()
    }
}

/// The state for the consensus task. Contains all of the information for the implementation
/// of consensus
pub struct ConsensusTaskState {
    /// This node's id
    pub node_id: NodeId,
    /// Our signing keys
    pub key_pair: SignatureKeyPair,
    /// The VRF key this node currently proves with
    pub vrf_key: VrfSecretKey,
    /// Consensus parameters
    pub config: ConsensusConfig,
    /// `(height, round, step)`, QCs, leader and message pool
    pub state: HotstuffState,
    /// View timers and message admission
    pub pacemaker: Pacemaker,
    /// Candidacies and VRF keys
    pub election: LeaderElection,
    /// Read side of the committed chain
    pub chain: ChainView,
    /// Write side of the committed chain, only touched on commit
    pub chain_writer: ChainWriter,
    /// Network for all nodes
    pub network: Arc<dyn ConnectedNetwork>,
    /// Transaction execution
    pub utility: Arc<dyn Utility>,
    /// Output events to application
    pub output_event_stream: Sender<Event>,
    /// Internal event bus, used to schedule delayed proposals
    pub internal_event_stream: Sender<Arc<ConsensusEvent>>,
    /// The `(height, round)` a delayed proposal is scheduled for
    pub pending_proposal: Option<(Height, Round)>,
    /// Spawned delayed proposals, so we can cancel them on shutdown
    pub spawned_tasks: Vec<JoinHandle<()>>,
    /// Inert key generation
    pub dkg: DkgStub,
    /// Metrics
    pub metrics: Arc<ConsensusMetricsValue>,
}

impl ConsensusTaskState {
    /// Whether this node leads the current round
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Enter the initial view.
    ///
    /// At genesis nothing is announced until the first `TriggerNextView`.
    pub async fn start_consensus(&mut self) -> Result<()> {
        if self.state.view.height == 0 {
            info!("Waiting at genesis for a trigger");
            return Ok(());
        }
        let change = self.pacemaker.start_view(&mut self.state);
        self.apply_view_change(change).await
    }

    /// Route a decoded envelope by its tag
    async fn handle_message(&mut self, message: ConsensusMessage) -> Result<()> {
        match message {
            ConsensusMessage::Hotstuff(message) => self.handle_hotstuff_message(message).await,
            ConsensusMessage::Debug(command) => self.handle_debug_message(command).await,
            ConsensusMessage::Dkg(message) => {
                self.dkg.handle_message(&message);
                Ok(())
            }
            ConsensusMessage::LeaderElection(message) => {
                self.handle_leader_election_message(message).await
            }
            ConsensusMessage::StateSync(message) => {
                debug!("State sync is handled outside consensus, ignoring {message:?}");
                Ok(())
            }
            ConsensusMessage::Transaction(tx) => {
                if let Err(e) = self.utility.check_transaction(tx) {
                    debug!("Transaction rejected by the mempool: {e}");
                }
                Ok(())
            }
        }
    }

    /// Admit, authenticate, catch up, elect, store and hand a HotStuff message to the leader or
    /// replica handlers.
    ///
    /// Nothing about the node changes before the sender's signature has been checked.
    async fn handle_hotstuff_message(&mut self, message: HotstuffMessage) -> Result<()> {
        let admission = self.pacemaker.should_handle_message(&self.state, &message);
        if admission == Admission::Reject {
            return Ok(());
        }
        let validators = self.chain.validators();
        if let Err(e) = validation::validate_partial_signature(&message, &validators) {
            warn!(
                "Discarding {:?} for {} from {}: {e}",
                message.msg_type,
                message.view(),
                message.sender
            );
            return Ok(());
        }
        if let Admission::CatchUp(kind) = admission {
            if !self.catch_up_to(&message, kind).await? {
                return Ok(());
            }
        }

        if self.state.leader_id.is_none()
            && message.msg_type == MessageType::Propose
            && message.step != Step::NewRound
        {
            self.elect_leader().await;
        }

        match self.state.pool.insert(message.clone()) {
            PoolInsert::Added => {}
            PoolInsert::Duplicate => {
                debug!(
                    "Ignoring repeated {} message from {}",
                    message.step, message.sender
                );
                return Ok(());
            }
            PoolInsert::Overflow => {
                warn!(
                    "Message pool is full ({} bytes), dropping {} message from {}",
                    self.state.pool.total_bytes(),
                    message.step,
                    message.sender
                );
                return Ok(());
            }
        }

        // the leader is elected once a quorum announced the round, and again on every further
        // announcement while the round stays leaderless
        if message.step == Step::NewRound
            && self.state.leader_id.is_none()
            && self.has_new_round_quorum()
        {
            self.elect_leader().await;
        }

        if self.is_leader() {
            self.handle_leader_message(&message).await
        } else {
            self.handle_replica_message(&message).await
        }
    }

    /// Move to the view of an authenticated message that is ahead, when its sender may take the
    /// node there.
    ///
    /// Returns whether the message is to be handled in the new view.
    async fn catch_up_to(&mut self, message: &HotstuffMessage, kind: CatchUp) -> Result<bool> {
        let view = message.view();
        if message.step == Step::NewRound {
            self.hold_announcement(message.clone()).await?;
            return Ok(false);
        }

        let validators = self.chain.validators();
        match kind {
            CatchUp::Height => {
                debug!(
                    "Ignoring {} from {} for {view}: heights are joined on announcements only",
                    message.step, message.sender
                );
                return Ok(false);
            }
            CatchUp::Round => {
                if !self
                    .election
                    .is_eligible(message.sender, view.height, view.round, &validators)
                {
                    warn!("Not following {} to {view}: it may not lead that round", message.sender);
                    return Ok(false);
                }
            }
            CatchUp::Step => {
                if self.state.leader_id.is_none() {
                    self.elect_leader().await;
                }
                if self.state.leader_id != Some(message.sender) {
                    warn!(
                        "Not following {} to {view}: the leader is {:?}",
                        message.sender, self.state.leader_id
                    );
                    return Ok(false);
                }
            }
        }
        if let Some(qc) = &message.justify_qc {
            if let Err(e) = verify_qc(qc, &validators) {
                warn!("Not following {} to {view}: {e}", message.sender);
                return Ok(false);
            }
        }

        self.pacemaker.catch_up(&mut self.state, view, kind);
        if kind == CatchUp::Round {
            let leader = message.sender;
            self.state.leader_id = Some(leader);
            broadcast_event(Event::ViewChanged { view }, &self.output_event_stream).await;
            broadcast_event(Event::LeaderElected { view, leader }, &self.output_event_stream).await;
        }
        Ok(true)
    }

    /// Keep an authenticated `NewRound` for a later view, and join that view once more than a
    /// third of the validators announced it or something later
    async fn hold_announcement(&mut self, message: HotstuffMessage) -> Result<()> {
        let view = message.view();
        let latest_height = self.chain.snapshot().latest_height;
        if view.height != latest_height.saturating_add(1) {
            warn!(
                "{} announced {view} but the chain is at {latest_height}; state sync is needed",
                message.sender
            );
            return Ok(());
        }
        let needed = honest_witness_threshold(self.chain.validators().len());
        let Some(target) = self.state.hold_announcement(message, needed) else {
            return Ok(());
        };
        let current = self.state.view;
        if (target.height, target.round) <= (current.height, current.round) {
            return Ok(());
        }
        let change = self.pacemaker.join_view(&mut self.state, target);
        self.apply_view_change(change).await
    }

    /// Validators whose `NewRound` for the current round is in the pool
    fn new_round_announcers(&self) -> BTreeSet<NodeId> {
        let view = self.state.view;
        self.state
            .pool
            .messages_for(Step::NewRound, view.height, view.round)
            .map(|message| message.sender)
            .collect()
    }

    /// Whether a quorum announced the current round
    fn has_new_round_quorum(&self) -> bool {
        is_byzantine_quorum(self.new_round_announcers().len(), self.chain.validators().len())
    }

    /// Elect the leader of the current round among the validators that announced it
    async fn elect_leader(&mut self) {
        let view = self.state.view;
        let snapshot = self.chain.snapshot();
        let announced = self.new_round_announcers();
        let elected = self.election.elect(
            view.height,
            view.round,
            &snapshot.latest_block_hash,
            &snapshot.validators,
            &announced,
        );

        match elected {
            Ok(leader) if self.state.leader_id == Some(leader) => {}
            Ok(leader) => {
                debug!("Elected {leader} as leader of {view}");
                self.state.leader_id = Some(leader);
                broadcast_event(Event::LeaderElected { view, leader }, &self.output_event_stream)
                    .await;
            }
            Err(e) => {
                warn!("View {view} is leaderless: {e}");
                self.state.leader_id = None;
                self.metrics.number_of_leaderless_views.add(1);
                broadcast_event(Event::Leaderless { view }, &self.output_event_stream).await;
            }
        }
    }

    /// Store key announcements and candidacies gossiped by other validators
    async fn handle_leader_election_message(&mut self, message: LeaderElectionMessage) -> Result<()> {
        let snapshot = self.chain.snapshot();
        match message {
            LeaderElectionMessage::VrfKeyBroadcast(announcement) => {
                let node_id = announcement.node_id;
                if let Err(e) = self.election.register_key(
                    announcement,
                    &snapshot.validators,
                    snapshot.latest_height,
                ) {
                    warn!("Rejected VRF key announcement from {node_id}: {e}");
                }
                Ok(())
            }
            LeaderElectionMessage::VrfProofBroadcast {
                height,
                round,
                candidate,
            } => {
                if height != snapshot.latest_height.saturating_add(1) {
                    debug!(
                        "Ignoring candidacy of {} for height {height}, chain is at {}",
                        candidate.node_id, snapshot.latest_height
                    );
                    return Ok(());
                }
                let node_id = candidate.node_id;
                if let Err(e) = self.election.receive_candidate(
                    height,
                    round,
                    &snapshot.latest_block_hash,
                    candidate,
                    &snapshot.validators,
                ) {
                    warn!("Rejected candidacy of {node_id} for ({height}, {round}): {e}");
                    return Ok(());
                }
                self.reelect_on_candidacy(height, round).await
            }
        }
    }

    /// A candidacy for the current round arrived after the election. Elect again while nothing
    /// was proposed yet, and propose if this node now leads.
    async fn reelect_on_candidacy(&mut self, height: Height, round: Round) -> Result<()> {
        let view = self.state.view;
        if view.height != height
            || view.round != round
            || view.step != Step::NewRound
            || !self.has_new_round_quorum()
        {
            return Ok(());
        }
        let previous = self.state.leader_id;
        self.elect_leader().await;
        if self.state.leader_id != previous && self.is_leader() {
            self.on_new_round_quorum().await?;
        }
        Ok(())
    }

    /// Abandon the current round and report why
    async fn interrupt_round(&mut self, reason: &str) {
        let view = self.state.view;
        self.pacemaker.interrupt_round(&mut self.state, reason);
        broadcast_event(
            Event::RoundInterrupted {
                view,
                reason: reason.to_string(),
            },
            &self.output_event_stream,
        )
        .await;
    }

    /// Carry out what the pacemaker decided
    async fn apply_view_change(&mut self, change: ViewChange) -> Result<()> {
        match change {
            ViewChange::Announce { view, qc } => self.announce_view(view, qc).await,
            ViewChange::None => Ok(()),
        }
    }

    /// Enter `view`: gossip our candidacy, then broadcast `NewRound` with our highest prepare QC.
    async fn announce_view(&mut self, view: View, qc: Option<QuorumCertificate>) -> Result<()> {
        broadcast_event(Event::ViewChanged { view }, &self.output_event_stream).await;

        let snapshot = self.chain.snapshot();
        if let Some(candidate) = self.election.candidacy(
            self.node_id,
            view.height,
            view.round,
            &snapshot.latest_block_hash,
            &snapshot.validators,
            &self.vrf_key,
        ) {
            debug!(
                "Leader candidate for {view} with sortition result {}",
                candidate.sortition_result
            );
            self.broadcast(ConsensusMessage::LeaderElection(
                LeaderElectionMessage::VrfProofBroadcast {
                    height: view.height,
                    round: view.round,
                    candidate,
                },
            ))
            .await?;
        }

        let new_round = HotstuffMessage::new_round(self.node_id, view.height, view.round, qc)
            .signed(&self.key_pair)?;
        self.broadcast(ConsensusMessage::Hotstuff(new_round)).await?;
        broadcast_event(Event::NewRoundBroadcast { view }, &self.output_event_stream).await;
        Ok(())
    }

    /// Deliver a block's transactions to the utility module
    fn deliver_block(&self, block: &Block) -> Result<()> {
        self.utility
            .begin_block(block.height())
            .context("begin block")?;
        for tx in &block.transactions {
            self.utility.deliver_tx(tx).context("deliver transaction")?;
        }
        Ok(())
    }

    /// Apply `block`, publish the new chain tip and rotate the VRF key when due.
    async fn commit_block(&mut self, block: &Block) -> Result<()> {
        let delivered = self
            .state
            .block
            .as_ref()
            .context("no block was delivered at this height")?;
        ensure!(
            delivered.hash() == block.hash(),
            "decided block {} is not the delivered block {}",
            block.hash(),
            delivered.hash()
        );
        self.utility.end_block(block).context("end block")?;
        self.chain_writer.commit_block(block);
        self.pacemaker.record_commit();

        let height = block.height();
        info!("Committed block {} at height {height}", block.hash());
        self.metrics
            .committed_height
            .set(usize::try_from(height).unwrap_or(usize::MAX));
        self.metrics.number_of_blocks_committed.add(1);
        broadcast_event(
            Event::BlockCommitted {
                block: block.clone(),
            },
            &self.output_event_stream,
        )
        .await;

        self.election.prune(height.saturating_add(1));
        self.refresh_vrf_key(height).await
    }

    /// Commit the decided block and move to the next height, or interrupt the round on failure.
    async fn commit_and_advance(&mut self, block: &Block) -> Result<()> {
        if let Err(e) = self.commit_block(block).await {
            warn!("Failed to commit block at height {}: {e:#}", block.height());
            self.interrupt_round("block commit failed").await;
            return Ok(());
        }
        let change = self.pacemaker.new_height(&mut self.state);
        self.apply_view_change(change).await
    }

    /// Every `vrf_key_refresh_freq_blocks` heights derive a new VRF key and announce it
    async fn refresh_vrf_key(&mut self, committed_height: Height) -> Result<()> {
        let frequency = self.config.vrf_key_refresh_freq_blocks;
        if frequency == 0 || committed_height % frequency != 0 {
            return Ok(());
        }
        let start_height = committed_height.saturating_add(1);
        let end_height = start_height.saturating_add(self.config.vrf_key_validity_blocks);
        let vrf_key = VrfSecretKey::derive(&self.key_pair.private_key_bytes(), start_height);
        let announcement = VrfKeyAnnouncement::new(
            self.node_id,
            &self.key_pair,
            vrf_key.verification_key(),
            start_height,
            end_height,
        )?;
        info!("Rotating VRF key for heights {start_height}..{end_height}");
        self.vrf_key = vrf_key;
        self.broadcast(ConsensusMessage::LeaderElection(
            LeaderElectionMessage::VrfKeyBroadcast(announcement),
        ))
        .await
    }

    /// Sign a vote for `block` in `view` and send it to `recipient`
    async fn send_vote(&self, view: View, block: Block, recipient: NodeId) -> Result<()> {
        let vote = HotstuffMessage::vote(self.node_id, &self.key_pair, view, block)?;
        self.send_to(ConsensusMessage::Hotstuff(vote), recipient)
            .await
    }

    /// Encode and broadcast to every validator, ourselves included
    async fn broadcast(&self, message: ConsensusMessage) -> Result<()> {
        let envelope = message.encode()?;
        self.network.broadcast_message(envelope).await?;
        Ok(())
    }

    /// Encode and send to a single validator
    async fn send_to(&self, message: ConsensusMessage, recipient: NodeId) -> Result<()> {
        let envelope = message.encode()?;
        self.network.send_message(envelope, recipient).await?;
        Ok(())
    }

    /// Keep the view gauges current
    fn update_gauges(&self) {
        self.metrics.record_view(self.state.view);
    }
}

#[async_trait]
impl TaskState for ConsensusTaskState {
    type Event = ConsensusEvent;

    async fn cancel_subtasks(&mut self) {
        self.pacemaker.cancel_timer();
        for task in self.spawned_tasks.drain(..) {
            cancel_task(task).await;
        }
    }

    #[instrument(skip_all, fields(id = %self.node_id, view = %self.state.view), name = "Consensus task", level = "error")]
    async fn handle_event(
        &mut self,
        event: Arc<Self::Event>,
        _sender: &Sender<Arc<Self::Event>>,
        _receiver: &Receiver<Arc<Self::Event>>,
    ) -> Result<()> {
        let result = match event.as_ref() {
            ConsensusEvent::MessageRecv(message) => self.handle_message(message.clone()).await,
            ConsensusEvent::Timeout { view, epoch } => {
                let change = self.pacemaker.on_timeout(&mut self.state, *view, *epoch);
                if change != ViewChange::None {
                    broadcast_event(Event::Timeout { view: *view }, &self.output_event_stream)
                        .await;
                }
                self.apply_view_change(change).await
            }
            ConsensusEvent::ProposeReady { height, round } => {
                self.on_propose_ready(*height, *round).await
            }
            ConsensusEvent::Shutdown => Ok(()),
        };
        self.update_gauges();
        result
    }
}

#[cfg(test)]
mod test {
    use hotpokt_types::{block::BlockHash, validator::NodeId};

    use super::*;

    #[test]
    fn round_changes_clear_the_pool_but_keep_the_lock() {
        let mut state = HotstuffState::new(NodeId(1), 3, u64::MAX);
        let block = Block::new(3, BlockHash::GENESIS, NodeId(2), vec![], vec![]);
        state.block = Some(block.clone());
        state.leader_id = Some(NodeId(2));
        assert_eq!(
            state
                .pool
                .insert(HotstuffMessage::new_round(NodeId(2), 3, 0, None)),
            PoolInsert::Added
        );

        // a later step of the same round keeps what was received
        state.catch_up_round(View::new(3, 0, Step::Prepare));
        assert!(!state.pool.is_empty());

        state.catch_up_round(View::new(3, 2, Step::Prepare));
        assert!(state.pool.is_empty());
        assert_eq!(state.block, Some(block));

        state.reset_round();
        assert_eq!(state.current_view(), View::new(3, 2, Step::NewRound));
        assert!(!state.has_leader());

        state.advance_height();
        assert_eq!(state.current_view(), View::new(4, 0, Step::NewRound));
        assert_eq!(state.block, None);
    }

    #[test]
    fn height_catch_up_forgets_the_old_height() {
        let mut state = HotstuffState::new(NodeId(1), 1, u64::MAX);
        state.leader_id = Some(NodeId(1));
        assert!(state.is_leader());
        state.catch_up_height(View::new(5, 1, Step::Commit));
        assert_eq!(state.current_view(), View::new(5, 1, Step::Commit));
        assert!(!state.has_leader());
        assert_eq!(state.high_prepare_qc(), None);

        state.reset_to_genesis();
        assert_eq!(state.current_view(), View::GENESIS);
    }
}
