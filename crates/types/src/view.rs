// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The `(height, round, step)` coordinate every consensus message is tagged with.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Block height. Increases by one per committed block.
pub type Height = u64;

/// Round within a height. Resets to zero on every new height.
pub type Round = u8;

/// The five phases a round cycles through.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Step {
    /// Replicas announce the view and their highest prepare QC
    #[default]
    NewRound,
    /// Leader proposes a block
    Prepare,
    /// Leader distributes the prepare QC
    PreCommit,
    /// Leader distributes the locking QC
    Commit,
    /// Leader distributes the commit QC; the block is final
    Decide,
}

impl Step {
    /// All steps, in protocol order.
    pub const ALL: [Step; 5] = [
        Step::NewRound,
        Step::Prepare,
        Step::PreCommit,
        Step::Commit,
        Step::Decide,
    ];

    /// The step that follows this one within a round, if any.
    #[must_use]
    pub fn next(self) -> Option<Step> {
        match self {
            Step::NewRound => Some(Step::Prepare),
            Step::Prepare => Some(Step::PreCommit),
            Step::PreCommit => Some(Step::Commit),
            Step::Commit => Some(Step::Decide),
            Step::Decide => None,
        }
    }

    /// The step whose QC justifies a proposal for this step.
    #[must_use]
    pub fn justified_by(self) -> Option<Step> {
        match self {
            Step::NewRound | Step::Prepare => None,
            Step::PreCommit => Some(Step::Prepare),
            Step::Commit => Some(Step::PreCommit),
            Step::Decide => Some(Step::Commit),
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::NewRound => "NEWROUND",
            Step::Prepare => "PREPARE",
            Step::PreCommit => "PRECOMMIT",
            Step::Commit => "COMMIT",
            Step::Decide => "DECIDE",
        };
        write!(f, "{name}")
    }
}

/// A replica's position in the protocol.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct View {
    /// Height being decided
    pub height: Height,
    /// Round at that height
    pub round: Round,
    /// Phase within the round
    pub step: Step,
}

impl View {
    /// The genesis view `(0, 0, NewRound)`.
    pub const GENESIS: View = View {
        height: 0,
        round: 0,
        step: Step::NewRound,
    };

    /// Create a view
    #[must_use]
    pub const fn new(height: Height, round: Round, step: Step) -> Self {
        Self {
            height,
            round,
            step,
        }
    }

    /// Whether `(round, step)` of `other` is strictly before this view at the same height.
    #[must_use]
    pub fn is_ahead_of_round_step(&self, other: &View) -> bool {
        (self.round, self.step) > (other.round, other.step)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.round, self.step)
    }
}
