// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! VRF keys announced by validators, indexed by the heights they cover.

use std::collections::BTreeMap;

use hotpokt_types::{
    election::VrfKeyAnnouncement,
    validator::{NodeId, ValidatorSet},
    view::Height,
    vrf::VrfVerificationKey,
};
use tracing::debug;

use crate::error::ElectionError;

/// Announced VRF keys per validator
///
/// A validator without a covering announcement falls back to the genesis key in the validator set.
#[derive(Clone, Debug)]
pub struct VrfKeyRegistry {
    /// announcements per validator, newest start height last
    keys: BTreeMap<NodeId, Vec<VrfKeyAnnouncement>>,
    /// live announcements kept per validator
    max_per_validator: usize,
}

impl VrfKeyRegistry {
    /// Create an empty registry holding at most `max_per_validator` live keys per validator
    #[must_use]
    pub fn new(max_per_validator: usize) -> Self {
        Self {
            keys: BTreeMap::new(),
            max_per_validator,
        }
    }

    /// Store an announcement after checking it was signed by the validator it names.
    ///
    /// Only heights above `latest_height` can be announced for, and a start height can be
    /// announced once. Repeating an identical announcement is a no-op.
    ///
    /// # Errors
    /// If the sender is unknown, the range is empty or already started, the signature does not
    /// verify, a different key was announced for the same start, or the validator holds too many keys
    pub fn register(
        &mut self,
        announcement: VrfKeyAnnouncement,
        validators: &ValidatorSet,
        latest_height: Height,
    ) -> Result<(), ElectionError> {
        let node_id = announcement.node_id;
        let validator = validators
            .get(node_id)
            .ok_or(ElectionError::UnknownValidator(node_id))?;
        if announcement.start_height >= announcement.end_height {
            return Err(ElectionError::EmptyKeyRange {
                node_id,
                start: announcement.start_height,
                end: announcement.end_height,
            });
        }
        if announcement.start_height <= latest_height {
            return Err(ElectionError::StaleKeyAnnouncement {
                node_id,
                start: announcement.start_height,
                latest: latest_height,
            });
        }
        if !announcement.is_signed_by(&validator.public_key) {
            return Err(ElectionError::BadKeySignature(node_id));
        }

        let entries = self.keys.entry(node_id).or_default();
        if let Some(existing) = entries
            .iter()
            .find(|existing| existing.start_height == announcement.start_height)
        {
            if *existing == announcement {
                return Ok(());
            }
            return Err(ElectionError::KeyAlreadyAnnounced {
                node_id,
                start: announcement.start_height,
            });
        }
        if entries.len() >= self.max_per_validator {
            return Err(ElectionError::TooManyKeys {
                node_id,
                limit: self.max_per_validator,
            });
        }

        debug!(
            "Registered VRF key of {node_id} for heights {}..{}",
            announcement.start_height, announcement.end_height
        );
        entries.push(announcement);
        entries.sort_by_key(|entry| entry.start_height);
        Ok(())
    }

    /// The key `node_id` proves with at `height`
    ///
    /// The most recent announcement covering the height wins, then the genesis key.
    #[must_use]
    pub fn key_for(
        &self,
        node_id: NodeId,
        height: Height,
        validators: &ValidatorSet,
    ) -> Option<VrfVerificationKey> {
        self.keys
            .get(&node_id)
            .and_then(|entries| entries.iter().rev().find(|entry| entry.covers(height)))
            .map(|entry| entry.vrf_verification_key)
            .or_else(|| validators.get(node_id).map(|v| v.vrf_verification_key))
    }

    /// Drop every announcement that expired before `height`
    pub fn prune(&mut self, height: Height) {
        for entries in self.keys.values_mut() {
            entries.retain(|entry| entry.end_height > height);
        }
        self.keys.retain(|_, entries| !entries.is_empty());
    }

    /// Forget every announcement
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Number of live announcements
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }

    /// Whether no announcement is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
