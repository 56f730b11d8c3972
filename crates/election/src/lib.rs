// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Stake weighted leader election for the `HotPokt` consensus core.
//!
//! Each validator privately runs VRF sortition for every view and gossips its candidacy when it wins
//! at least one unit. Receivers verify the candidacy against the VRF key known for the sender and keep
//! it in a [`CandidatePool`]. Once a quorum has announced the view, the candidate with the highest
//! sortition result among the announcers wins. Every node that saw the same announcers therefore
//! elects the same leader.

pub mod error;
pub mod leader;
pub mod pool;
pub mod registry;
pub mod sortition;

use std::collections::BTreeSet;

use hotpokt_types::{
    block::BlockHash,
    config::LeaderElectionMethod,
    election::{LeaderCandidate, VrfKeyAnnouncement},
    validator::{NodeId, ValidatorSet},
    view::{Height, Round},
    vrf::VrfSecretKey,
};
use tracing::debug;

pub use crate::error::ElectionError;
use crate::{
    leader::{elect_leader, is_leader_candidate, round_robin_leader},
    pool::CandidatePool,
    registry::VrfKeyRegistry,
    sortition::{sortition, view_seed},
};

/// Per node election state: the configured method, known VRF keys and gossiped candidacies
#[derive(Clone, Debug)]
pub struct LeaderElection {
    /// how leaders are picked
    method: LeaderElectionMethod,
    /// expected number of candidates per view
    num_expected_leaders: u64,
    /// announced VRF keys
    registry: VrfKeyRegistry,
    /// verified candidacies
    pool: CandidatePool,
}

impl LeaderElection {
    /// Create empty election state keeping at most `max_keys_per_validator` announced VRF keys
    #[must_use]
    pub fn new(
        method: LeaderElectionMethod,
        num_expected_leaders: u64,
        max_keys_per_validator: usize,
    ) -> Self {
        Self {
            method,
            num_expected_leaders,
            registry: VrfKeyRegistry::new(max_keys_per_validator),
            pool: CandidatePool::new(),
        }
    }

    /// Whether leaders come out of sortition, so candidacies need to be gossiped
    #[must_use]
    pub fn uses_sortition(&self) -> bool {
        self.method == LeaderElectionMethod::VrfWithCdf
    }

    /// Run sortition for the local node.
    ///
    /// Returns `None` when the node is not a candidate, or when leaders are not picked by sortition.
    #[must_use]
    pub fn candidacy(
        &self,
        node_id: NodeId,
        height: Height,
        round: Round,
        prev_block_hash: &BlockHash,
        validators: &ValidatorSet,
        vrf_secret_key: &VrfSecretKey,
    ) -> Option<LeaderCandidate> {
        if !self.uses_sortition() {
            return None;
        }
        let stake = validators.get(node_id)?.stake;
        is_leader_candidate(
            node_id,
            height,
            round,
            prev_block_hash,
            stake,
            validators.total_stake(),
            self.num_expected_leaders,
            vrf_secret_key,
        )
    }

    /// Verify a gossiped candidacy and add it to the pool.
    ///
    /// The candidacy must use the key known for its node at `height`, its proof must verify over the
    /// view seed, and its sortition result must match the node's stake.
    ///
    /// # Errors
    /// If the sender is unknown or the candidacy does not verify
    pub fn receive_candidate(
        &mut self,
        height: Height,
        round: Round,
        prev_block_hash: &BlockHash,
        candidate: LeaderCandidate,
        validators: &ValidatorSet,
    ) -> Result<(), ElectionError> {
        let node_id = candidate.node_id;
        let validator = validators
            .get(node_id)
            .ok_or(ElectionError::UnknownValidator(node_id))?;
        let known_key = self.registry.key_for(node_id, height, validators);
        if known_key != Some(candidate.verification_key) {
            return Err(ElectionError::InvalidCandidate(node_id));
        }
        let seed = view_seed(height, round, prev_block_hash);
        if !candidate
            .verification_key
            .verify_output(&seed, &candidate.vrf_proof, &candidate.vrf_output)
        {
            return Err(ElectionError::InvalidCandidate(node_id));
        }
        let expected = sortition(
            validator.stake,
            validators.total_stake(),
            self.num_expected_leaders,
            &candidate.vrf_output,
        );
        if expected == 0 || expected != candidate.sortition_result {
            return Err(ElectionError::InvalidCandidate(node_id));
        }

        if !self.pool.insert(height, round, candidate) {
            debug!("Ignoring repeated candidacy of {node_id} for height {height} round {round}");
        }
        Ok(())
    }

    /// Store a VRF key announcement for heights above `latest_height`
    ///
    /// # Errors
    /// If the announcement does not verify or is not accepted by the registry
    pub fn register_key(
        &mut self,
        announcement: VrfKeyAnnouncement,
        validators: &ValidatorSet,
        latest_height: Height,
    ) -> Result<(), ElectionError> {
        self.registry.register(announcement, validators, latest_height)
    }

    /// Leader of `(height, round)` under the configured method
    ///
    /// Under sortition only candidates in `announced`, the validators whose `NewRound` for the view
    /// was received, are considered. Round robin ignores it.
    ///
    /// # Errors
    /// [`ElectionError::NoLeader`] if no verified candidate is known for the view,
    /// [`ElectionError::EmptyValidatorSet`] under round robin with no validators
    pub fn elect(
        &self,
        height: Height,
        round: Round,
        prev_block_hash: &BlockHash,
        validators: &ValidatorSet,
        announced: &BTreeSet<NodeId>,
    ) -> Result<NodeId, ElectionError> {
        match self.method {
            LeaderElectionMethod::RoundRobin => round_robin_leader(validators, height, round),
            LeaderElectionMethod::VrfWithCdf => elect_leader(
                self.pool
                    .candidates(height, round)
                    .filter(|candidate| announced.contains(&candidate.node_id)),
                height,
                round,
                prev_block_hash,
            ),
        }
    }

    /// Whether `node_id` may lead `(height, round)`: the round robin pick, or a validator with a
    /// verified candidacy for the view
    #[must_use]
    pub fn is_eligible(
        &self,
        node_id: NodeId,
        height: Height,
        round: Round,
        validators: &ValidatorSet,
    ) -> bool {
        match self.method {
            LeaderElectionMethod::RoundRobin => {
                round_robin_leader(validators, height, round).is_ok_and(|leader| leader == node_id)
            }
            LeaderElectionMethod::VrfWithCdf => self.pool.contains(height, round, node_id),
        }
    }

    /// Drop candidacies and expired keys below `height`
    pub fn prune(&mut self, height: Height) {
        self.pool.prune_below(height);
        self.registry.prune(height);
    }

    /// Forget all gossiped state
    pub fn reset(&mut self) {
        self.pool.clear();
        self.registry.clear();
    }
}

#[cfg(test)]
mod test {
    use hotpokt_types::ValidatorConfig;

    use super::*;

    fn validators(count: u64) -> (Vec<ValidatorConfig>, ValidatorSet) {
        let configs: Vec<_> = (1..=count)
            .map(|i| ValidatorConfig::generated_from_seed_indexed([9; 32], NodeId(i), 100))
            .collect();
        let set = ValidatorSet::new(configs.iter().map(ValidatorConfig::validator));
        (configs, set)
    }

    fn everyone(set: &ValidatorSet) -> BTreeSet<NodeId> {
        set.node_ids().into_iter().collect()
    }

    #[test]
    fn gossiped_candidacies_elect_the_same_leader_everywhere() {
        let (configs, set) = validators(4);
        let prev = BlockHash([1; 32]);
        let all = everyone(&set);
        // expected leaders equal to total stake: everyone is a candidate
        let mut nodes: Vec<_> = configs
            .iter()
            .map(|_| LeaderElection::new(LeaderElectionMethod::VrfWithCdf, 400, 2))
            .collect();
        let candidacies: Vec<_> = configs
            .iter()
            .filter_map(|c| nodes[0].candidacy(c.node_id, 3, 1, &prev, &set, &c.genesis_vrf_key()))
            .collect();
        assert_eq!(candidacies.len(), 4);

        for node in &mut nodes {
            for candidate in &candidacies {
                node.receive_candidate(3, 1, &prev, candidate.clone(), &set).unwrap();
            }
        }
        let leader = nodes[0].elect(3, 1, &prev, &set, &all).unwrap();
        for node in &nodes {
            assert_eq!(node.elect(3, 1, &prev, &set, &all).unwrap(), leader);
            assert!(node.is_eligible(leader, 3, 1, &set));
        }

        nodes[0].prune(4);
        assert!(!nodes[0].is_eligible(leader, 3, 1, &set));
        assert!(nodes[0].elect(3, 1, &prev, &set, &all).is_err());
    }

    #[test]
    fn only_announced_validators_are_elected() {
        let (configs, set) = validators(4);
        let prev = BlockHash([2; 32]);
        let mut election = LeaderElection::new(LeaderElectionMethod::VrfWithCdf, 400, 2);
        for config in &configs {
            let candidate = election
                .candidacy(config.node_id, 1, 0, &prev, &set, &config.genesis_vrf_key())
                .unwrap();
            election.receive_candidate(1, 0, &prev, candidate, &set).unwrap();
        }
        let strongest = election.elect(1, 0, &prev, &set, &everyone(&set)).unwrap();

        let without_strongest: BTreeSet<_> =
            set.node_ids().into_iter().filter(|id| *id != strongest).collect();
        let runner_up = election.elect(1, 0, &prev, &set, &without_strongest).unwrap();
        assert_ne!(runner_up, strongest);

        assert_eq!(
            election.elect(1, 0, &prev, &set, &BTreeSet::new()),
            Err(ElectionError::NoLeader { height: 1, round: 0 })
        );
    }

    #[test]
    fn proposers_without_a_candidacy_are_not_eligible() {
        let (configs, set) = validators(3);
        let prev = BlockHash::GENESIS;
        let mut election = LeaderElection::new(LeaderElectionMethod::VrfWithCdf, 300, 2);
        assert!(!election.is_eligible(NodeId(2), 1, 0, &set));
        assert!(election.elect(1, 0, &prev, &set, &everyone(&set)).is_err());

        let candidate = election
            .candidacy(NodeId(3), 1, 0, &prev, &set, &configs[2].genesis_vrf_key())
            .unwrap();
        election.receive_candidate(1, 0, &prev, candidate, &set).unwrap();
        assert!(election.is_eligible(NodeId(3), 1, 0, &set));
        assert!(!election.is_eligible(NodeId(2), 1, 0, &set));
        assert!(!election.is_eligible(NodeId(3), 1, 1, &set));
    }

    #[test]
    fn inflated_or_misattributed_candidacies_are_rejected() {
        let (configs, set) = validators(2);
        let prev = BlockHash::GENESIS;
        let mut election = LeaderElection::new(LeaderElectionMethod::VrfWithCdf, 200, 2);
        let mut candidate = election
            .candidacy(NodeId(1), 1, 0, &prev, &set, &configs[0].genesis_vrf_key())
            .unwrap();

        let mut inflated = candidate.clone();
        inflated.sortition_result += 1;
        assert_eq!(
            election.receive_candidate(1, 0, &prev, inflated, &set),
            Err(ElectionError::InvalidCandidate(NodeId(1)))
        );

        // node 2 replays node 1's proof under its own id
        candidate.node_id = NodeId(2);
        assert_eq!(
            election.receive_candidate(1, 0, &prev, candidate, &set),
            Err(ElectionError::InvalidCandidate(NodeId(2)))
        );
        assert!(!election.is_eligible(NodeId(1), 1, 0, &set));
        assert!(!election.is_eligible(NodeId(2), 1, 0, &set));
    }

    #[test]
    fn round_robin_needs_no_candidacies() {
        let (configs, set) = validators(3);
        let election = LeaderElection::new(LeaderElectionMethod::RoundRobin, 3, 2);
        assert!(!election.uses_sortition());
        assert!(election
            .candidacy(NodeId(1), 0, 0, &BlockHash::GENESIS, &set, &configs[0].genesis_vrf_key())
            .is_none());
        assert_eq!(
            election
                .elect(4, 0, &BlockHash::GENESIS, &set, &BTreeSet::new())
                .unwrap(),
            NodeId(2)
        );
        assert!(election.is_eligible(NodeId(2), 4, 0, &set));
        assert!(!election.is_eligible(NodeId(3), 4, 0, &set));
    }
}
