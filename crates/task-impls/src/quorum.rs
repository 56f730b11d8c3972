// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::collections::BTreeSet;

use hotpokt_types::{
    block::Block,
    error::HotPoktError,
    message::{HotstuffMessage, MessageType, PartialSignature, QuorumCertificate, ThresholdSignature},
    signature_key::verify_signature,
    validator::ValidatorSet,
    view::{Step, View},
};
use tracing::debug;

use crate::pool::MessagePool;

/// Whether `count` distinct validators out of `num_validators` form a Byzantine quorum.
///
/// Strictly more than two thirds are required, so exactly `2/3 * N` is not enough.
#[must_use]
pub fn is_byzantine_quorum(count: usize, num_validators: usize) -> bool {
    count.saturating_mul(3) > num_validators.saturating_mul(2)
}

/// Fewest validators out of `num_validators` that must include an honest one: more than a third
#[must_use]
pub fn honest_witness_threshold(num_validators: usize) -> usize {
    num_validators / 3 + 1
}

/// Pack partial signatures into a threshold signature
#[must_use]
pub fn threshold_signature(partials: Vec<PartialSignature>) -> ThresholdSignature {
    ThresholdSignature::from_partials(partials)
}

/// Aggregate the votes for `block` stored in `pool` at `view` into a QC.
///
/// # Errors
/// [`HotPoktError::ThresholdNotMet`] if fewer than a quorum of validators voted for `block`
pub fn form_qc(
    pool: &MessagePool,
    view: View,
    block: &Block,
    validators: &ValidatorSet,
) -> Result<QuorumCertificate, HotPoktError> {
    let block_hash = block.hash();
    let partials: Vec<PartialSignature> = pool
        .messages_for(view.step, view.height, view.round)
        .filter(|message| message.msg_type == MessageType::Vote)
        .filter(|message| message.block.as_ref().map(Block::hash) == Some(block_hash))
        .filter_map(|message| message.partial_sig.clone())
        .collect();

    if !is_byzantine_quorum(partials.len(), validators.len()) {
        return Err(HotPoktError::ThresholdNotMet {
            received: partials.len(),
            validators: validators.len(),
        });
    }

    Ok(QuorumCertificate {
        height: view.height,
        round: view.round,
        step: view.step,
        block: block.clone(),
        threshold_signature: threshold_signature(partials),
    })
}

/// Check every signature of a QC against the validator set.
///
/// # Errors
/// If there are no signatures, a signer repeats or is not a validator, a signature does not
/// verify, or there are fewer signers than a quorum
pub fn verify_qc(qc: &QuorumCertificate, validators: &ValidatorSet) -> Result<(), HotPoktError> {
    let partials = match &qc.threshold_signature {
        ThresholdSignature::Naive(partials) => partials,
        ThresholdSignature::Bls(_) => {
            return Err(HotPoktError::Unsupported(
                "aggregated threshold signatures".to_string(),
            ))
        }
    };
    if partials.is_empty() {
        return Err(HotPoktError::InvalidQuorumCertificate(
            "no signatures".to_string(),
        ));
    }

    let message = qc.signable_bytes()?;
    let mut signers = BTreeSet::new();
    for partial in partials {
        if !signers.insert(partial.node_id) {
            return Err(HotPoktError::InvalidQuorumCertificate(format!(
                "{} signed twice",
                partial.node_id
            )));
        }
        let validator = validators
            .get(partial.node_id)
            .ok_or(HotPoktError::UnknownValidator(partial.node_id))?;
        if !verify_signature(&validator.public_key, &message, &partial.signature) {
            return Err(HotPoktError::InvalidQuorumCertificate(format!(
                "signature of {} does not verify",
                partial.node_id
            )));
        }
    }

    if !is_byzantine_quorum(signers.len(), validators.len()) {
        return Err(HotPoktError::ThresholdNotMet {
            received: signers.len(),
            validators: validators.len(),
        });
    }
    Ok(())
}

/// The freshest valid prepare QC carried by `messages`, ordered by `(height, round)`
pub fn find_high_qc<'a>(
    messages: impl IntoIterator<Item = &'a HotstuffMessage>,
    validators: &ValidatorSet,
) -> Option<QuorumCertificate> {
    messages
        .into_iter()
        .filter_map(|message| message.justify_qc.as_ref())
        .filter(|qc| qc.step == Step::Prepare)
        .filter(|qc| match verify_qc(qc, validators) {
            Ok(()) => true,
            Err(e) => {
                debug!("Ignoring justify QC at ({}, {}): {e}", qc.height, qc.round);
                false
            }
        })
        .max_by_key(|qc| (qc.height, qc.round))
        .cloned()
}

#[cfg(test)]
mod test {
    use hotpokt_types::{
        block::BlockHash,
        validator::NodeId,
        view::{Height, Round},
        ValidatorConfig,
    };

    use super::*;
    use crate::pool::PoolInsert;

    fn setup(count: u64) -> (Vec<ValidatorConfig>, ValidatorSet) {
        let configs: Vec<_> = (1..=count)
            .map(|i| ValidatorConfig::generated_from_seed_indexed([4; 32], NodeId(i), 1))
            .collect();
        let validators = ValidatorSet::new(configs.iter().map(ValidatorConfig::validator));
        (configs, validators)
    }

    fn block(height: Height) -> Block {
        Block::new(height, BlockHash::GENESIS, NodeId(1), vec![vec![1, 2, 3]], vec![])
    }

    fn qc_signed_by(
        configs: &[ValidatorConfig],
        height: Height,
        round: Round,
        block: &Block,
    ) -> QuorumCertificate {
        let view = View::new(height, round, Step::Prepare);
        let mut pool = MessagePool::new(u64::MAX);
        for config in configs {
            let vote =
                HotstuffMessage::vote(config.node_id, &config.key_pair, view, block.clone()).unwrap();
            assert_eq!(pool.insert(vote), PoolInsert::Added);
        }
        QuorumCertificate {
            height,
            round,
            step: Step::Prepare,
            block: block.clone(),
            threshold_signature: threshold_signature(
                pool.messages_for(Step::Prepare, height, round)
                    .filter_map(|m| m.partial_sig.clone())
                    .collect(),
            ),
        }
    }

    #[test]
    fn quorum_needs_strictly_more_than_two_thirds() {
        assert!(!is_byzantine_quorum(2, 3));
        assert!(is_byzantine_quorum(3, 3));
        assert!(!is_byzantine_quorum(2, 4));
        assert!(is_byzantine_quorum(3, 4));
        // exactly 2/3 of 6
        assert!(!is_byzantine_quorum(4, 6));
        assert!(is_byzantine_quorum(5, 6));
        assert!(!is_byzantine_quorum(0, 0));
    }

    #[test]
    fn witnesses_are_more_than_a_third() {
        assert_eq!(honest_witness_threshold(1), 1);
        assert_eq!(honest_witness_threshold(3), 2);
        assert_eq!(honest_witness_threshold(4), 2);
        assert_eq!(honest_witness_threshold(6), 3);
        assert_eq!(honest_witness_threshold(7), 3);
    }

    #[test]
    fn qc_forms_only_at_quorum() {
        let (configs, validators) = setup(4);
        let block = block(1);
        let view = View::new(1, 0, Step::Prepare);
        let mut pool = MessagePool::new(u64::MAX);
        for config in &configs[..2] {
            pool.insert(
                HotstuffMessage::vote(config.node_id, &config.key_pair, view, block.clone()).unwrap(),
            );
        }
        assert_eq!(
            form_qc(&pool, view, &block, &validators),
            Err(HotPoktError::ThresholdNotMet {
                received: 2,
                validators: 4
            })
        );

        // a vote for another block does not count
        let other = Block::new(1, BlockHash::GENESIS, NodeId(2), vec![], vec![]);
        pool.insert(
            HotstuffMessage::vote(configs[2].node_id, &configs[2].key_pair, view, other).unwrap(),
        );
        assert!(form_qc(&pool, view, &block, &validators).is_err());

        pool.insert(
            HotstuffMessage::vote(configs[3].node_id, &configs[3].key_pair, view, block.clone())
                .unwrap(),
        );
        let qc = form_qc(&pool, view, &block, &validators).unwrap();
        assert_eq!(qc.block.hash(), block.hash());
        assert_eq!(verify_qc(&qc, &validators), Ok(()));
    }

    #[test]
    fn any_bad_signature_or_unknown_signer_invalidates_the_qc() {
        let (configs, validators) = setup(4);
        let block = block(2);
        let mut qc = qc_signed_by(&configs, 2, 0, &block);
        assert_eq!(verify_qc(&qc, &validators), Ok(()));

        // the same signatures over a different round
        let mut replayed = qc.clone();
        replayed.round = 1;
        assert!(matches!(
            verify_qc(&replayed, &validators),
            Err(HotPoktError::InvalidQuorumCertificate(_))
        ));

        let (_, smaller) = setup(3);
        assert_eq!(
            verify_qc(&qc, &smaller),
            Err(HotPoktError::UnknownValidator(NodeId(4)))
        );

        if let ThresholdSignature::Naive(partials) = &mut qc.threshold_signature {
            let first = partials[0].clone();
            partials[1] = first;
        }
        assert!(matches!(
            verify_qc(&qc, &validators),
            Err(HotPoktError::InvalidQuorumCertificate(_))
        ));

        qc.threshold_signature = ThresholdSignature::Bls(vec![0; 48]);
        assert!(matches!(
            verify_qc(&qc, &validators),
            Err(HotPoktError::Unsupported(_))
        ));
    }

    #[test]
    fn high_qc_is_the_freshest_valid_one() {
        let (configs, validators) = setup(4);
        let older = qc_signed_by(&configs, 3, 1, &block(3));
        let newer = qc_signed_by(&configs, 3, 4, &block(3));
        let mut forged = qc_signed_by(&configs, 3, 9, &block(3));
        forged.round = 10;

        let messages: Vec<_> = [Some(older), None, Some(forged), Some(newer.clone())]
            .into_iter()
            .enumerate()
            .map(|(i, qc)| HotstuffMessage::new_round(NodeId(i as u64 + 1), 3, 10, qc))
            .collect();
        assert_eq!(find_high_qc(&messages, &validators), Some(newer));
        assert_eq!(find_high_qc(&messages[1..2], &validators), None);
    }
}
