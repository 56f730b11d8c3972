// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Leader candidates gossiped for each view

use std::collections::BTreeMap;

use hotpokt_types::{
    election::LeaderCandidate,
    validator::NodeId,
    view::{Height, Round},
};

/// Verified candidacies, one per validator per `(height, round)`
#[derive(Clone, Debug, Default)]
pub struct CandidatePool {
    /// candidates by view, then by node
    candidates: BTreeMap<(Height, Round), BTreeMap<NodeId, LeaderCandidate>>,
}

impl CandidatePool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidacy; returns `false` if the node already has one for the view
    pub fn insert(&mut self, height: Height, round: Round, candidate: LeaderCandidate) -> bool {
        let view = self.candidates.entry((height, round)).or_default();
        if view.contains_key(&candidate.node_id) {
            return false;
        }
        view.insert(candidate.node_id, candidate);
        true
    }

    /// Candidates known for `(height, round)`, in [`NodeId`] order
    pub fn candidates(
        &self,
        height: Height,
        round: Round,
    ) -> impl Iterator<Item = &LeaderCandidate> {
        self.candidates
            .get(&(height, round))
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Whether `node_id` has a candidacy for `(height, round)`
    #[must_use]
    pub fn contains(&self, height: Height, round: Round, node_id: NodeId) -> bool {
        self.candidates
            .get(&(height, round))
            .is_some_and(|view| view.contains_key(&node_id))
    }

    /// Drop every view below `height`
    pub fn prune_below(&mut self, height: Height) {
        self.candidates = self.candidates.split_off(&(height, 0));
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}

#[cfg(test)]
mod test {
    use hotpokt_types::vrf::VrfSecretKey;

    use super::*;

    fn candidate(id: u64) -> LeaderCandidate {
        let key = VrfSecretKey::from_seed(&[u8::try_from(id).unwrap(); 32]);
        let (vrf_output, vrf_proof) = key.prove(b"seed");
        LeaderCandidate {
            node_id: NodeId(id),
            verification_key: key.verification_key(),
            vrf_proof,
            vrf_output,
            sortition_result: 1,
        }
    }

    #[test]
    fn one_candidacy_per_node_and_view() {
        let mut pool = CandidatePool::new();
        assert!(pool.insert(1, 0, candidate(2)));
        assert!(pool.insert(1, 0, candidate(1)));
        assert!(!pool.insert(1, 0, candidate(2)));
        assert!(pool.insert(1, 1, candidate(2)));

        let ids: Vec<_> = pool.candidates(1, 0).map(|c| c.node_id).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2)]);
        assert!(pool.contains(1, 1, NodeId(2)));
        assert!(!pool.contains(1, 1, NodeId(1)));
        assert!(!pool.contains(2, 0, NodeId(2)));
    }

    #[test]
    fn pruning_keeps_current_height() {
        let mut pool = CandidatePool::new();
        pool.insert(1, 3, candidate(1));
        pool.insert(2, 0, candidate(1));
        pool.insert(3, 1, candidate(1));
        pool.prune_below(2);
        assert!(!pool.contains(1, 3, NodeId(1)));
        assert!(pool.contains(2, 0, NodeId(1)));
        assert!(pool.contains(3, 1, NodeId(1)));
    }
}
