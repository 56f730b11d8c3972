// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::collections::HashMap;

use hotpokt_types::message::{DkgMessage, DkgRound};
use tracing::{debug, info};

/// Placeholder for distributed key generation.
///
/// Messages are counted per round and otherwise dropped; nothing here feeds back into consensus.
#[derive(Debug, Default)]
pub struct DkgStub {
    /// messages seen per round
    received: HashMap<DkgRound, usize>,
}

impl DkgStub {
    /// Record and drop a protocol message
    pub fn handle_message(&mut self, message: &DkgMessage) {
        *self.received.entry(message.round).or_default() += 1;
        debug!(
            "Dropping DKG {:?} message from {} ({} bytes): key generation is inactive",
            message.round,
            message.sender,
            message.payload.len()
        );
    }

    /// Operator request to start a key generation
    pub fn trigger(&self) {
        info!("DKG is inactive, ignoring trigger");
    }

    /// How many messages were seen for `round`
    #[must_use]
    pub fn received(&self, round: DkgRound) -> usize {
        self.received.get(&round).copied().unwrap_or_default()
    }
}
