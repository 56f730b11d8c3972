// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Candidacy and leader selection for a single view

use hotpokt_types::{
    block::BlockHash,
    election::LeaderCandidate,
    validator::{NodeId, StakeAmount, ValidatorSet},
    view::{Height, Round},
    vrf::VrfSecretKey,
};
use tracing::{debug, warn};

use crate::{
    error::ElectionError,
    sortition::{sortition, view_seed},
};

/// Whether the holder of `vrf_secret_key` is a leader candidate for `(height, round)`.
///
/// Returns `None` when sortition selects no stake units.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn is_leader_candidate(
    node_id: NodeId,
    height: Height,
    round: Round,
    prev_block_hash: &BlockHash,
    stake: StakeAmount,
    total_stake: StakeAmount,
    num_expected_leaders: u64,
    vrf_secret_key: &VrfSecretKey,
) -> Option<LeaderCandidate> {
    let seed = view_seed(height, round, prev_block_hash);
    let (vrf_output, vrf_proof) = vrf_secret_key.prove(&seed);
    let sortition_result = sortition(stake, total_stake, num_expected_leaders, &vrf_output);
    if sortition_result == 0 {
        debug!("{node_id} is not a leader candidate for height {height} round {round}");
        return None;
    }
    Some(LeaderCandidate {
        node_id,
        verification_key: vrf_secret_key.verification_key(),
        vrf_proof,
        vrf_output,
        sortition_result,
    })
}

/// Pick the leader among `candidates` for `(height, round)`.
///
/// Candidates whose proof does not verify against their key and the view seed are discarded.
/// The highest sortition result wins; equal results go to the lowest [`NodeId`].
///
/// # Errors
/// [`ElectionError::NoLeader`] if no candidate survives verification
pub fn elect_leader<'a>(
    candidates: impl IntoIterator<Item = &'a LeaderCandidate>,
    height: Height,
    round: Round,
    prev_block_hash: &BlockHash,
) -> Result<NodeId, ElectionError> {
    let seed = view_seed(height, round, prev_block_hash);
    candidates
        .into_iter()
        .filter(|candidate| {
            let valid = candidate.verification_key.verify_output(
                &seed,
                &candidate.vrf_proof,
                &candidate.vrf_output,
            );
            if !valid {
                warn!(
                    "Discarding candidate {} for height {height} round {round}: proof does not verify",
                    candidate.node_id
                );
            }
            valid
        })
        .max_by(|a, b| {
            a.sortition_result
                .cmp(&b.sortition_result)
                .then_with(|| b.node_id.cmp(&a.node_id))
        })
        .map(|candidate| candidate.node_id)
        .ok_or(ElectionError::NoLeader { height, round })
}

/// `validators[(height + round) % n]` in [`NodeId`] order
///
/// # Errors
/// [`ElectionError::EmptyValidatorSet`] if there is nobody to pick
pub fn round_robin_leader(
    validators: &ValidatorSet,
    height: Height,
    round: Round,
) -> Result<NodeId, ElectionError> {
    let ids = validators.node_ids();
    if ids.is_empty() {
        return Err(ElectionError::EmptyValidatorSet);
    }
    let index = height.wrapping_add(u64::from(round)) % ids.len() as u64;
    usize::try_from(index)
        .ok()
        .and_then(|index| ids.get(index).copied())
        .ok_or(ElectionError::EmptyValidatorSet)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn key(i: u64) -> VrfSecretKey {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&i.to_le_bytes());
        VrfSecretKey::from_seed(&seed)
    }

    fn candidates_for(
        stakes: &[u64],
        height: Height,
        round: Round,
        prev: &BlockHash,
        expected: u64,
    ) -> Vec<LeaderCandidate> {
        let total: u64 = stakes.iter().sum();
        stakes
            .iter()
            .enumerate()
            .filter_map(|(i, stake)| {
                let id = i as u64 + 1;
                is_leader_candidate(NodeId(id), height, round, prev, *stake, total, expected, &key(id))
            })
            .collect()
    }

    #[test]
    fn election_is_deterministic_and_picks_the_maximum() {
        let prev = BlockHash([7; 32]);
        let candidates = candidates_for(&[10; 10], 5, 0, &prev, 10);
        assert!(!candidates.is_empty());

        let first = elect_leader(&candidates, 5, 0, &prev).unwrap();
        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(elect_leader(&reversed, 5, 0, &prev).unwrap(), first);

        let best = candidates.iter().map(|c| c.sortition_result).max().unwrap();
        let winner = candidates.iter().find(|c| c.node_id == first).unwrap();
        assert_eq!(winner.sortition_result, best);
    }

    #[test]
    fn ties_go_to_the_lowest_node_id() {
        let prev = BlockHash::GENESIS;
        let mut candidates = candidates_for(&[100; 4], 1, 0, &prev, 100);
        for candidate in &mut candidates {
            // proofs stay valid, only the claimed results collide
            candidate.sortition_result = 42;
        }
        let lowest = candidates.iter().map(|c| c.node_id).min().unwrap();
        assert_eq!(elect_leader(&candidates, 1, 0, &prev).unwrap(), lowest);
    }

    #[test]
    fn forged_candidates_are_discarded() {
        let prev = BlockHash::GENESIS;
        let mut candidates = candidates_for(&[100; 4], 1, 0, &prev, 100);
        assert_eq!(candidates.len(), 4);
        // candidate 1 claims a huge result but proves for a different round
        let (output, proof) = key(1).prove(&view_seed(1, 1, &prev));
        candidates[0].vrf_output = output;
        candidates[0].vrf_proof = proof;
        candidates[0].sortition_result = u64::MAX;
        let leader = elect_leader(&candidates, 1, 0, &prev).unwrap();
        assert_ne!(leader, NodeId(1));

        assert_eq!(
            elect_leader(&candidates[..1], 1, 0, &prev),
            Err(ElectionError::NoLeader {
                height: 1,
                round: 0
            })
        );
    }

    #[test]
    fn candidacy_is_proportional_to_stake() {
        // 10 validators over 1000 views with 3 expected candidates, 7% tolerance
        let stakes: Vec<u64> = (1..=10).map(|i| i * 1_000_000).collect();
        let total: u64 = stakes.iter().sum();
        let views = 1000u32;
        let expected_leaders = 3u64;
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let mut candidacies: HashMap<NodeId, u32> = HashMap::new();
        let mut leaderless = 0u32;
        for view in 0..views {
            let prev = BlockHash(rng.gen());
            let height = u64::from(view);
            let round: Round = rng.gen_range(0..10);
            let candidates = candidates_for(&stakes, height, round, &prev, expected_leaders);
            for candidate in &candidates {
                *candidacies.entry(candidate.node_id).or_default() += 1;
            }
            match elect_leader(&candidates, height, round, &prev) {
                Ok(leader) => assert!((1..=10).contains(&leader.0)),
                Err(_) => leaderless += 1,
            }
        }

        let err_threshold = 0.07;
        let tolerance = 3.0 * f64::from(views) * err_threshold;
        for (i, stake) in stakes.iter().enumerate() {
            let id = NodeId(i as u64 + 1);
            let expected = 3.0 * f64::from(views) * (*stake as f64 / total as f64);
            let counted = f64::from(*candidacies.get(&id).unwrap_or(&0));
            assert!(
                (counted - expected).abs() <= tolerance,
                "node {id}: candidate {counted} times, expected {expected}"
            );
        }
        let expected_leaderless = f64::from(views) * err_threshold;
        assert!((f64::from(leaderless) - expected_leaderless).abs() <= tolerance);
    }

    #[test]
    fn round_robin_rotates_through_sorted_ids() {
        use hotpokt_types::ValidatorConfig;
        let validators = ValidatorSet::new(
            [3u64, 1, 2]
                .into_iter()
                .map(|i| ValidatorConfig::generated_from_seed_indexed([0; 32], NodeId(i), 1).validator()),
        );
        assert_eq!(round_robin_leader(&validators, 0, 0).unwrap(), NodeId(1));
        assert_eq!(round_robin_leader(&validators, 1, 0).unwrap(), NodeId(2));
        assert_eq!(round_robin_leader(&validators, 1, 1).unwrap(), NodeId(3));
        assert_eq!(round_robin_leader(&validators, 2, 2).unwrap(), NodeId(2));
        assert_eq!(
            round_robin_leader(&ValidatorSet::default(), 0, 0),
            Err(ElectionError::EmptyValidatorSet)
        );
    }
}
