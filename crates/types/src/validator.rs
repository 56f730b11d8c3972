// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The validator set and the shared chain snapshot consensus reads it from.
//!
//! Every component receives a [`ChainView`] at construction time. Reads go through an immutable
//! [`ChainSnapshot`] behind an `Arc`, so a handler works on a consistent view of the validator set
//! for its whole execution. The only writer is the [`ChainWriter`] held by the commit path.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    block::{Block, BlockHash},
    signature_key::PublicKey,
    view::Height,
    vrf::VrfVerificationKey,
};

/// Stable identifier for a validator. Never reused within a fork.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stake, in the chain's smallest unit
pub type StakeAmount = u64;

/// A single validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// identifier
    pub node_id: NodeId,
    /// key that partial signatures are checked against
    pub public_key: PublicKey,
    /// genesis VRF key, used until the validator broadcasts a fresher one
    pub vrf_verification_key: VrfVerificationKey,
    /// bonded stake
    pub stake: StakeAmount,
    /// where peers reach this validator
    pub service_address: String,
}

/// Validators ordered by [`NodeId`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// members
    validators: BTreeMap<NodeId, Validator>,
    /// cached sum of all stake
    total_stake: StakeAmount,
}

impl ValidatorSet {
    /// Build a set. Later entries with a duplicate [`NodeId`] replace earlier ones.
    #[must_use]
    pub fn new(validators: impl IntoIterator<Item = Validator>) -> Self {
        let validators: BTreeMap<NodeId, Validator> = validators
            .into_iter()
            .map(|validator| (validator.node_id, validator))
            .collect();
        let total_stake = validators
            .values()
            .fold(0, |acc: StakeAmount, v| acc.saturating_add(v.stake));
        Self {
            validators,
            total_stake,
        }
    }

    /// Look up one validator
    #[must_use]
    pub fn get(&self, node_id: NodeId) -> Option<&Validator> {
        self.validators.get(&node_id)
    }

    /// Whether `node_id` is a member
    #[must_use]
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.validators.contains_key(&node_id)
    }

    /// Number of validators; the Byzantine threshold is computed over this count
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of all stake
    #[must_use]
    pub fn total_stake(&self) -> StakeAmount {
        self.total_stake
    }

    /// Iterate in [`NodeId`] order
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    /// Member ids in order
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.validators.keys().copied().collect()
    }
}

/// An immutable picture of the chain between two commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSnapshot {
    /// Height of the latest committed block, 0 before the first commit
    pub latest_height: Height,
    /// Hash of the latest committed block
    pub latest_block_hash: BlockHash,
    /// Current validator set
    pub validators: Arc<ValidatorSet>,
}

/// Read handle on the chain snapshot. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ChainView {
    /// latest published snapshot
    inner: Arc<RwLock<Arc<ChainSnapshot>>>,
}

/// The single writer of a [`ChainView`]. Not cloneable.
#[derive(Debug)]
pub struct ChainWriter {
    /// shared slot readers load from
    inner: Arc<RwLock<Arc<ChainSnapshot>>>,
}

impl ChainView {
    /// Create a view over an initial snapshot, returning the view and its only writer.
    #[must_use]
    pub fn new(snapshot: ChainSnapshot) -> (Self, ChainWriter) {
        let inner = Arc::new(RwLock::new(Arc::new(snapshot)));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            ChainWriter { inner },
        )
    }

    /// The current snapshot. Holding it does not block the writer.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        Arc::clone(&self.inner.read())
    }

    /// The current validator set
    #[must_use]
    pub fn validators(&self) -> Arc<ValidatorSet> {
        Arc::clone(&self.inner.read().validators)
    }
}

impl ChainWriter {
    /// Publish the effect of committing `block`.
    pub fn commit_block(&self, block: &Block) {
        let mut slot = self.inner.write();
        let next = ChainSnapshot {
            latest_height: block.height(),
            latest_block_hash: block.hash(),
            validators: Arc::clone(&slot.validators),
        };
        *slot = Arc::new(next);
    }

    /// Reset to an empty chain over the same validators
    pub fn reset_to_genesis(&self) {
        let mut slot = self.inner.write();
        let next = ChainSnapshot {
            latest_height: 0,
            latest_block_hash: BlockHash::GENESIS,
            validators: Arc::clone(&slot.validators),
        };
        *slot = Arc::new(next);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{signature_key::SignatureKeyPair, vrf::VrfSecretKey};

    fn validator(id: u64, stake: StakeAmount) -> Validator {
        Validator {
            node_id: NodeId(id),
            public_key: SignatureKeyPair::generated_from_seed_indexed([0; 32], id).public_key(),
            vrf_verification_key: VrfSecretKey::from_seed(&[u8::try_from(id).unwrap(); 32])
                .verification_key(),
            stake,
            service_address: format!("node{id}:8080"),
        }
    }

    #[test]
    fn total_stake_sums_members() {
        let set = ValidatorSet::new([validator(2, 10), validator(1, 5), validator(3, 1)]);
        assert_eq!(set.total_stake(), 16);
        assert_eq!(set.len(), 3);
        assert_eq!(set.node_ids(), vec![NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_commit() {
        let set = ValidatorSet::new([validator(1, 5)]);
        let (view, writer) = ChainView::new(ChainSnapshot {
            latest_height: 0,
            latest_block_hash: BlockHash::GENESIS,
            validators: Arc::new(set),
        });
        let before = view.snapshot();
        let block = Block::new(1, BlockHash::GENESIS, NodeId(1), vec![], vec![]);
        writer.commit_block(&block);

        assert_eq!(before.latest_height, 0);
        let after = view.snapshot();
        assert_eq!(after.latest_height, 1);
        assert_eq!(after.latest_block_hash, block.hash());
        assert!(Arc::ptr_eq(&before.validators, &after.validators));
    }
}
