// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Checks a replica runs before it votes

use hotpokt_types::{
    block::{Block, BlockHash},
    error::HotPoktError,
    message::{HotstuffMessage, MessageType, QuorumCertificate},
    signature_key::verify_signature,
    validator::{NodeId, ValidatorSet},
    view::{Height, Step},
};

use crate::quorum::verify_qc;

/// A vote must be signed by its sender, a validator, over the vote's own view and block.
///
/// # Errors
/// If the signature is missing, misattributed, from a stranger, or does not verify
pub fn validate_partial_signature(
    message: &HotstuffMessage,
    validators: &ValidatorSet,
) -> Result<(), HotPoktError> {
    let partial = message
        .partial_sig
        .as_ref()
        .ok_or(HotPoktError::InvalidPartialSignature(message.sender))?;
    if partial.node_id != message.sender {
        return Err(HotPoktError::InvalidPartialSignature(message.sender));
    }
    let validator = validators
        .get(partial.node_id)
        .ok_or(HotPoktError::UnknownValidator(partial.node_id))?;
    let bytes = message.signable_bytes()?;
    if !verify_signature(&validator.public_key, &bytes, &partial.signature) {
        return Err(HotPoktError::InvalidPartialSignature(message.sender));
    }
    Ok(())
}

/// Safety rule for a `Prepare` proposal.
///
/// A node that holds no lock accepts any well formed proposal. A locked node accepts only a
/// proposal extending its locked block, or one justified by a QC newer than its lock.
///
/// # Errors
/// [`HotPoktError::InvalidProposal`] or the justify QC's verification error
pub fn validate_proposal(
    message: &HotstuffMessage,
    locked_qc: Option<&QuorumCertificate>,
    validators: &ValidatorSet,
) -> Result<(), HotPoktError> {
    if message.msg_type != MessageType::Propose || message.step != Step::Prepare {
        return Err(HotPoktError::InvalidProposal(format!(
            "expected a prepare proposal, got a {:?} at step {}",
            message.msg_type, message.step
        )));
    }
    let block = message
        .block
        .as_ref()
        .ok_or_else(|| HotPoktError::InvalidProposal("proposal carries no block".to_string()))?;

    if let Some(justify) = &message.justify_qc {
        if justify.step != Step::Prepare {
            return Err(HotPoktError::InvalidProposal(format!(
                "justify QC is from step {}",
                justify.step
            )));
        }
        verify_qc(justify, validators)?;
    }

    let Some(locked) = locked_qc else {
        return Ok(());
    };
    match &message.justify_qc {
        // safety: the proposal extends the locked block
        Some(justify) if justify.block.hash() == locked.block.hash() => Ok(()),
        // liveness: the justification is newer than the lock
        Some(justify) if (justify.height, justify.round) > (locked.height, locked.round) => Ok(()),
        Some(justify) => Err(HotPoktError::InvalidProposal(format!(
            "justify QC at ({}, {}) does not unlock ({}, {})",
            justify.height, justify.round, locked.height, locked.round
        ))),
        None if block.hash() == locked.block.hash() => Ok(()),
        None => Err(HotPoktError::InvalidProposal(
            "unjustified proposal conflicts with the locked block".to_string(),
        )),
    }
}

/// Structural checks on a proposed block
///
/// # Errors
/// [`HotPoktError::InvalidBlock`] on the first failed check
pub fn validate_block(
    block: &Block,
    height: Height,
    latest_block_hash: &BlockHash,
    leader: Option<NodeId>,
) -> Result<(), HotPoktError> {
    if !block.is_hash_consistent() {
        return Err(HotPoktError::InvalidBlock(
            "hash does not match the contents".to_string(),
        ));
    }
    if block.height() != height {
        return Err(HotPoktError::InvalidBlock(format!(
            "block height {} is not the current height {height}",
            block.height()
        )));
    }
    if block.header.last_block_hash != *latest_block_hash {
        return Err(HotPoktError::InvalidBlock(format!(
            "block builds on {} but the chain tip is {latest_block_hash}",
            block.header.last_block_hash
        )));
    }
    if Some(block.header.proposer_id) != leader {
        return Err(HotPoktError::InvalidBlock(format!(
            "proposed by {} who is not the leader",
            block.header.proposer_id
        )));
    }
    Ok(())
}

/// Checks on the QC a leader sends with a `PreCommit`, `Commit` or `Decide` proposal.
///
/// Returns the QC when it justifies the message's step at the message's height and round, verifies,
/// and is over the block this node accepted.
///
/// # Errors
/// If any of the above does not hold
pub fn validate_step_qc<'a>(
    message: &'a HotstuffMessage,
    delivered: Option<&Block>,
    validators: &ValidatorSet,
) -> Result<&'a QuorumCertificate, HotPoktError> {
    let qc = message.justify_qc.as_ref().ok_or_else(|| {
        HotPoktError::InvalidQuorumCertificate(format!("{} proposal without a QC", message.step))
    })?;
    if Some(qc.step) != message.step.justified_by() {
        return Err(HotPoktError::InvalidQuorumCertificate(format!(
            "a {} QC cannot justify {}",
            qc.step, message.step
        )));
    }
    if qc.height != message.height || qc.round != message.round {
        return Err(HotPoktError::InvalidQuorumCertificate(format!(
            "QC at ({}, {}) for a proposal at ({}, {})",
            qc.height, qc.round, message.height, message.round
        )));
    }
    verify_qc(qc, validators)?;
    let delivered = delivered.ok_or_else(|| {
        HotPoktError::InvalidState("no block was accepted in this round".to_string())
    })?;
    if qc.block.hash() != delivered.hash() {
        return Err(HotPoktError::InvalidQuorumCertificate(format!(
            "QC is for block {} but {} was accepted",
            qc.block.hash(),
            delivered.hash()
        )));
    }
    Ok(qc)
}
