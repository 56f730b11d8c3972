// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The pacemaker drives view changes and decides which messages the state machine may act on.
//!
//! It never mutates consensus state directly. Every change goes through the narrow [`ViewDriver`]
//! interface, and its timer only enqueues a [`ConsensusEvent::Timeout`] onto the event bus.

use std::{sync::Arc, time::Duration};

use async_broadcast::Sender;
use hotpokt_types::{
    config::PacemakerConfig,
    message::{HotstuffMessage, MessageType, QuorumCertificate},
    traits::metrics::ConsensusMetricsValue,
    view::{Step, View},
};
use tokio::{
    task::{spawn, JoinHandle},
    time::{sleep, Instant},
};
use tracing::{debug, info};

use crate::{events::ConsensusEvent, helpers::broadcast_event};

/// The part of the consensus state the pacemaker is allowed to change
pub trait ViewDriver {
    /// The current `(height, round, step)`
    fn current_view(&self) -> View;

    /// Increment the round at the current height
    fn advance_round(&mut self);

    /// Move to round 0 of the next height, dropping the block and QCs of the old one
    fn advance_height(&mut self);

    /// Go back to `NewRound` and forget the leader and the round's messages
    fn reset_round(&mut self);

    /// Adopt the round and step of a later message at the current height
    fn catch_up_round(&mut self, view: View);

    /// Adopt a message's view at a later height, dropping the block, QCs and leader
    fn catch_up_height(&mut self, view: View);

    /// Whether this node leads the current round
    fn is_leader(&self) -> bool;

    /// Whether a leader is known for the current round
    fn has_leader(&self) -> bool;

    /// The highest prepare QC this node holds
    fn high_prepare_qc(&self) -> Option<QuorumCertificate>;
}

/// How far ahead of the node an admitted message is
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CatchUp {
    /// a later height
    Height,
    /// a later round at the current height
    Round,
    /// a later step of the current round
    Step,
}

/// Outcome of the admission check on an inbound HotStuff message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// drop the message
    Reject,
    /// the message matches the current view
    Accept,
    /// the message is ahead; the node may move to its view once the message is authenticated
    CatchUp(CatchUp),
}

/// What the state machine has to do after a pacemaker transition
#[derive(Clone, Debug, PartialEq)]
pub enum ViewChange {
    /// Broadcast `NewRound` for `view`, justified by `qc`
    Announce {
        /// the fresh view
        view: View,
        /// highest prepare QC to carry
        qc: Option<QuorumCertificate>,
    },
    /// Nothing to send
    None,
}

/// View timers, backoff, and manual mode
#[derive(Debug)]
pub struct Pacemaker {
    /// timing parameters
    config: PacemakerConfig,
    /// whether view changes wait for an explicit trigger
    manual: bool,
    /// QC parked by a view change in manual mode, used by the next forced view
    manual_qc: Option<QuorumCertificate>,
    /// a view change is held back by manual mode
    parked: bool,
    /// the armed timer
    timer: Option<JoinHandle<()>>,
    /// incremented on every arming so stale timeouts can be told apart
    epoch: u64,
    /// when the last block was committed
    last_commit: Option<Instant>,
    /// internal event bus the timer reports to
    event_sender: Sender<Arc<ConsensusEvent>>,
    /// metrics
    metrics: Arc<ConsensusMetricsValue>,
}

impl Pacemaker {
    /// Create a pacemaker reporting timeouts on `event_sender`
    #[must_use]
    pub fn new(
        config: PacemakerConfig,
        event_sender: Sender<Arc<ConsensusEvent>>,
        metrics: Arc<ConsensusMetricsValue>,
    ) -> Self {
        Self {
            manual: config.manual,
            config,
            manual_qc: None,
            parked: false,
            timer: None,
            epoch: 0,
            last_commit: None,
            event_sender,
            metrics,
        }
    }

    /// Whether automatic view changes are suspended
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Suspend or resume automatic view changes. Entering manual mode disarms the timer.
    pub fn set_manual_mode(&mut self, manual: bool) {
        info!("Pacemaker manual mode {}", if manual { "on" } else { "off" });
        self.manual = manual;
        if manual {
            self.cancel_timer();
        }
    }

    /// Decide whether `message` may be handled in the current view.
    ///
    /// Nothing changes here. A message that is ahead is reported as [`Admission::CatchUp`] and the
    /// caller moves with [`Pacemaker::catch_up`] only after checking who sent it. Votes never move
    /// the view.
    pub fn should_handle_message<D: ViewDriver>(
        &self,
        driver: &D,
        message: &HotstuffMessage,
    ) -> Admission {
        let current = driver.current_view();
        let incoming = message.view();

        if incoming.height < current.height {
            debug!(
                "Discarding message from {}: node at height {} > message height {}",
                message.sender, current.height, incoming.height
            );
            return Admission::Reject;
        }

        if message.msg_type == MessageType::Vote && incoming != current {
            debug!(
                "Discarding vote from {} for {incoming}, node is at {current}",
                message.sender
            );
            return Admission::Reject;
        }

        if incoming.height > current.height {
            return Admission::CatchUp(CatchUp::Height);
        }

        // the leader acts on its own proposals directly, never through the replica handlers
        if driver.is_leader()
            && message.msg_type == MessageType::Propose
            && message.step != Step::NewRound
        {
            return Admission::Reject;
        }

        if current.is_ahead_of_round_step(&incoming) {
            debug!(
                "Discarding message from {}: node at {current} > message at {incoming}",
                message.sender
            );
            return Admission::Reject;
        }

        if incoming == current {
            Admission::Accept
        } else if incoming.round != current.round {
            Admission::CatchUp(CatchUp::Round)
        } else {
            Admission::CatchUp(CatchUp::Step)
        }
    }

    /// Move to `view`, which an authenticated message showed the network has reached
    pub fn catch_up<D: ViewDriver>(&self, driver: &mut D, view: View, kind: CatchUp) {
        let current = driver.current_view();
        match kind {
            CatchUp::Height => {
                info!("Catching up from {current} to {view} at a later height");
                driver.catch_up_height(view);
            }
            CatchUp::Round => {
                info!("Catching up from {current} to {view}");
                driver.catch_up_round(view);
            }
            CatchUp::Step => {
                debug!("Following the leader from {current} to {view}");
                driver.catch_up_round(view);
            }
        }
    }

    /// Enter the `NewRound` of a later `view` that enough validators announced, and announce it too
    pub fn join_view<D: ViewDriver>(&mut self, driver: &mut D, view: View) -> ViewChange {
        let target = View::new(view.height, view.round, Step::NewRound);
        let kind = if target.height == driver.current_view().height {
            CatchUp::Round
        } else {
            CatchUp::Height
        };
        self.catch_up(driver, target, kind);
        let qc = driver.high_prepare_qc();
        self.start_next_view(driver, qc, false)
    }

    /// Abort the current round without committing. The round number is left alone.
    pub fn interrupt_round<D: ViewDriver>(&mut self, driver: &mut D, reason: &str) {
        info!("Interrupting round at {}: {reason}", driver.current_view());
        self.metrics.number_of_interrupts.add(1);
        driver.reset_round();
    }

    /// Handle the expiry of the timer armed with `epoch`: move to the next round.
    pub fn on_timeout<D: ViewDriver>(
        &mut self,
        driver: &mut D,
        view: View,
        epoch: u64,
    ) -> ViewChange {
        if epoch != self.epoch || self.manual || view.height != driver.current_view().height {
            debug!("Ignoring stale timeout for {view}");
            return ViewChange::None;
        }
        info!("Timed out at {}", driver.current_view());
        self.timer = None;
        self.metrics.number_of_timeouts.add(1);
        self.next_round(driver)
    }

    /// Abandon the current round and start the next one at the same height
    pub fn next_round<D: ViewDriver>(&mut self, driver: &mut D) -> ViewChange {
        driver.advance_round();
        let qc = driver.high_prepare_qc();
        self.start_next_view(driver, qc, false)
    }

    /// Start round 0 of the next height
    pub fn new_height<D: ViewDriver>(&mut self, driver: &mut D) -> ViewChange {
        driver.advance_height();
        info!("Starting first round for new block at height {}", driver.current_view().height);
        self.start_next_view(driver, None, false)
    }

    /// Enter the driver's current view, as when starting on top of an existing chain
    pub fn start_view<D: ViewDriver>(&mut self, driver: &mut D) -> ViewChange {
        let qc = driver.high_prepare_qc();
        self.start_next_view(driver, qc, false)
    }

    /// Start the next view immediately with the parked QC, or the highest prepare QC
    pub fn force_next_view<D: ViewDriver>(&mut self, driver: &mut D) -> ViewChange {
        let qc = self.manual_qc.take().or_else(|| driver.high_prepare_qc());
        self.start_next_view(driver, qc, true)
    }

    /// Reset round state and, unless manual mode holds it back, announce the new view.
    fn start_next_view<D: ViewDriver>(
        &mut self,
        driver: &mut D,
        qc: Option<QuorumCertificate>,
        forced: bool,
    ) -> ViewChange {
        driver.reset_round();
        let view = driver.current_view();
        self.metrics.record_view(view);
        if self.manual && !forced {
            self.manual_qc = qc;
            self.parked = true;
            self.cancel_timer();
            return ViewChange::None;
        }
        self.parked = false;
        self.restart_timer(view);
        ViewChange::Announce { view, qc }
    }

    /// Arm the timer for `view`, replacing the previous one.
    ///
    /// No timer runs in manual mode or at genesis.
    pub fn restart_timer(&mut self, view: View) {
        self.cancel_timer();
        if self.manual || view.height == 0 {
            return;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        let timeout = self.config.timeout_for_round(view.round);
        let stream = self.event_sender.clone();
        self.timer = Some(spawn(async move {
            sleep(timeout).await;
            broadcast_event(Arc::new(ConsensusEvent::Timeout { view, epoch }), &stream).await;
        }));
    }

    /// Disarm the timer
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Whether a timer is armed
    #[must_use]
    pub fn is_timer_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    /// Note that a block was just committed
    pub fn record_commit(&mut self) {
        self.last_commit = Some(Instant::now());
    }

    /// Time left before the leader may propose the next block
    #[must_use]
    pub fn remaining_block_interval(&self) -> Option<Duration> {
        let elapsed = self.last_commit?.elapsed();
        self.config
            .min_block_interval()
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }

    /// Disarm the timer and forget debug state
    pub fn reset(&mut self) {
        self.cancel_timer();
        self.manual_qc = None;
        self.parked = false;
        self.last_commit = None;
    }

    /// Whether manual mode is holding back a view change
    #[must_use]
    pub fn has_parked_view(&self) -> bool {
        self.parked
    }
}

#[cfg(test)]
mod test {
    use hotpokt_types::validator::NodeId;

    use super::*;

    /// Consensus state reduced to what the pacemaker touches
    #[derive(Debug, Default)]
    struct FakeDriver {
        view: View,
        leader: Option<NodeId>,
        me: NodeId,
        resets: usize,
        high_qc: Option<QuorumCertificate>,
    }

    impl ViewDriver for FakeDriver {
        fn current_view(&self) -> View {
            self.view
        }
        fn advance_round(&mut self) {
            self.view.round = self.view.round.saturating_add(1);
        }
        fn advance_height(&mut self) {
            self.view = View::new(self.view.height + 1, 0, Step::NewRound);
        }
        fn reset_round(&mut self) {
            self.view.step = Step::NewRound;
            self.leader = None;
            self.resets += 1;
        }
        fn catch_up_round(&mut self, view: View) {
            self.view = view;
        }
        fn catch_up_height(&mut self, view: View) {
            self.view = view;
            self.leader = None;
        }
        fn is_leader(&self) -> bool {
            self.leader == Some(self.me)
        }
        fn has_leader(&self) -> bool {
            self.leader.is_some()
        }
        fn high_prepare_qc(&self) -> Option<QuorumCertificate> {
            self.high_qc.clone()
        }
    }

    fn pacemaker(manual: bool) -> (Pacemaker, async_broadcast::Receiver<Arc<ConsensusEvent>>) {
        let (tx, rx) = async_broadcast::broadcast(16);
        let config = PacemakerConfig {
            timeout_msec: 20,
            manual,
            ..PacemakerConfig::default()
        };
        (
            Pacemaker::new(config, tx, Arc::new(ConsensusMetricsValue::default())),
            rx,
        )
    }

    fn proposal(sender: u64, view: View) -> HotstuffMessage {
        let mut message = HotstuffMessage::new_round(NodeId(sender), view.height, view.round, None);
        message.step = view.step;
        message
    }

    fn vote(sender: u64, view: View) -> HotstuffMessage {
        let mut message = proposal(sender, view);
        message.msg_type = MessageType::Vote;
        message
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replica_catches_up_to_a_later_round() {
        let (pacemaker, _rx) = pacemaker(false);
        let mut driver = FakeDriver {
            view: View::new(3, 2, Step::Prepare),
            me: NodeId(1),
            leader: Some(NodeId(2)),
            ..FakeDriver::default()
        };

        let message = proposal(4, View::new(3, 6, Step::Prepare));
        let admission = pacemaker.should_handle_message(&driver, &message);
        assert_eq!(admission, Admission::CatchUp(CatchUp::Round));
        // the check alone moves nothing
        assert_eq!(driver.current_view(), View::new(3, 2, Step::Prepare));

        pacemaker.catch_up(&mut driver, message.view(), CatchUp::Round);
        assert_eq!(driver.current_view(), View::new(3, 6, Step::Prepare));

        let message = proposal(4, View::new(3, 6, Step::PreCommit));
        let admission = pacemaker.should_handle_message(&driver, &message);
        assert_eq!(admission, Admission::CatchUp(CatchUp::Step));
        pacemaker.catch_up(&mut driver, message.view(), CatchUp::Step);
        assert_eq!(driver.current_view().step, Step::PreCommit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn votes_ahead_of_the_node_never_move_it() {
        let (pacemaker, _rx) = pacemaker(false);
        let driver = FakeDriver {
            view: View::new(1, 0, Step::PreCommit),
            me: NodeId(1),
            leader: Some(NodeId(2)),
            ..FakeDriver::default()
        };

        for ahead in [
            View::new(1, 0, Step::Decide),
            View::new(1, 3, Step::Prepare),
            View::new(1_000_000, 0, Step::Prepare),
        ] {
            assert_eq!(
                pacemaker.should_handle_message(&driver, &vote(4, ahead)),
                Admission::Reject
            );
        }
        assert_eq!(driver.current_view(), View::new(1, 0, Step::PreCommit));

        // the leader's next proposal is still admitted
        let next = proposal(2, View::new(1, 0, Step::PreCommit));
        assert_eq!(pacemaker.should_handle_message(&driver, &next), Admission::Accept);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_and_self_proposals_are_rejected() {
        let (pacemaker, _rx) = pacemaker(false);
        let driver = FakeDriver {
            view: View::new(5, 1, Step::PreCommit),
            me: NodeId(1),
            leader: Some(NodeId(1)),
            ..FakeDriver::default()
        };

        for stale in [
            View::new(4, 9, Step::Decide),
            View::new(5, 0, Step::Decide),
            View::new(5, 1, Step::Prepare),
        ] {
            assert_eq!(pacemaker.should_handle_message(&driver, &vote(2, stale)), Admission::Reject);
        }

        let own = proposal(1, View::new(5, 1, Step::PreCommit));
        assert_eq!(pacemaker.should_handle_message(&driver, &own), Admission::Reject);

        let accepted = vote(2, View::new(5, 1, Step::PreCommit));
        assert_eq!(pacemaker.should_handle_message(&driver, &accepted), Admission::Accept);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn higher_height_forces_height_catch_up() {
        let (pacemaker, _rx) = pacemaker(false);
        let mut driver = FakeDriver {
            view: View::new(2, 3, Step::Commit),
            leader: Some(NodeId(3)),
            ..FakeDriver::default()
        };
        let message = proposal(3, View::new(4, 0, Step::NewRound));
        let admission = pacemaker.should_handle_message(&driver, &message);
        assert_eq!(admission, Admission::CatchUp(CatchUp::Height));
        assert!(driver.has_leader());

        pacemaker.catch_up(&mut driver, message.view(), CatchUp::Height);
        assert_eq!(driver.current_view(), View::new(4, 0, Step::NewRound));
        assert!(!driver.has_leader());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn joining_a_later_round_announces_it() {
        let (mut pacemaker, _rx) = pacemaker(false);
        let mut driver = FakeDriver {
            view: View::new(2, 1, Step::Prepare),
            leader: Some(NodeId(3)),
            ..FakeDriver::default()
        };
        let change = pacemaker.join_view(&mut driver, View::new(2, 4, Step::NewRound));
        assert_eq!(
            change,
            ViewChange::Announce {
                view: View::new(2, 4, Step::NewRound),
                qc: None
            }
        );
        assert!(!driver.has_leader());
        assert!(pacemaker.is_timer_armed());
        pacemaker.cancel_timer();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timer_expiry_announces_the_next_round() {
        let (mut pacemaker, mut rx) = pacemaker(false);
        let mut driver = FakeDriver::default();

        let change = pacemaker.new_height(&mut driver);
        assert_eq!(
            change,
            ViewChange::Announce {
                view: View::new(1, 0, Step::NewRound),
                qc: None
            }
        );
        assert!(pacemaker.is_timer_armed());

        let event = rx.recv().await.unwrap();
        let ConsensusEvent::Timeout { view, epoch } = (*event).clone() else {
            panic!("expected a timeout, got {event}");
        };
        assert_eq!(view, View::new(1, 0, Step::NewRound));

        // a timeout from an earlier arming is ignored
        assert_eq!(pacemaker.on_timeout(&mut driver, view, epoch - 1), ViewChange::None);

        let change = pacemaker.on_timeout(&mut driver, view, epoch);
        assert_eq!(
            change,
            ViewChange::Announce {
                view: View::new(1, 1, Step::NewRound),
                qc: None
            }
        );
        pacemaker.cancel_timer();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_mode_parks_the_qc_until_forced() {
        let (mut pacemaker, _rx) = pacemaker(true);
        let mut driver = FakeDriver {
            view: View::new(1, 0, Step::Prepare),
            ..FakeDriver::default()
        };

        assert_eq!(pacemaker.new_height(&mut driver), ViewChange::None);
        assert!(pacemaker.has_parked_view());
        assert!(!pacemaker.is_timer_armed());
        assert_eq!(driver.current_view(), View::new(2, 0, Step::NewRound));

        pacemaker.interrupt_round(&mut driver, "test");
        assert_eq!(driver.current_view().round, 0);

        let change = pacemaker.force_next_view(&mut driver);
        assert_eq!(
            change,
            ViewChange::Announce {
                view: View::new(2, 0, Step::NewRound),
                qc: None
            }
        );
        assert!(!pacemaker.has_parked_view());
        assert!(!pacemaker.is_timer_armed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_timer_at_genesis() {
        let (mut pacemaker, _rx) = pacemaker(false);
        pacemaker.restart_timer(View::GENESIS);
        assert!(!pacemaker.is_timer_armed());
        pacemaker.restart_timer(View::new(1, 0, Step::Prepare));
        assert!(pacemaker.is_timer_armed());
        pacemaker.reset();
        assert!(!pacemaker.is_timer_armed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proposals_wait_out_the_block_interval_after_a_commit() {
        let (mut pacemaker, _rx) = pacemaker(false);
        assert_eq!(pacemaker.remaining_block_interval(), None);

        pacemaker.record_commit();
        let remaining = pacemaker.remaining_block_interval().unwrap();
        assert!(remaining <= PacemakerConfig::default().min_block_interval());

        pacemaker.reset();
        assert_eq!(pacemaker.remaining_block_interval(), None);
    }
}
