// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Blocks proposed by a leader and committed on `Decide`.

use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{validator::NodeId, view::Height};

/// A 32 byte SHA-256 digest identifying a block
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The hash standing in for the parent of the first block
    pub const GENESIS: BlockHash = BlockHash([0; 32]);
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// An opaque transaction, interpreted only by the utility module
pub type Transaction = Vec<u8>;

/// Block header
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height this block is proposed for
    pub height: Height,
    /// Digest over the rest of the header and the body
    pub hash: BlockHash,
    /// Hash of the block committed at `height - 1`
    pub last_block_hash: BlockHash,
    /// The leader that built the block
    pub proposer_id: NodeId,
}

/// A proposed block
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, custom_debug::Debug)]
pub struct Block {
    /// header
    pub header: BlockHeader,
    /// Transactions reaped from the mempool
    #[debug(with = "count_fmt")]
    pub transactions: Vec<Transaction>,
    /// Misbehavior evidence included by the proposer
    #[debug(with = "count_fmt")]
    pub evidence: Vec<Vec<u8>>,
}

/// Print only how many entries a list holds
#[allow(clippy::ptr_arg)]
fn count_fmt(items: &Vec<Vec<u8>>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{} items]", items.len())
}

impl Block {
    /// Build a block and seal its hash.
    #[must_use]
    pub fn new(
        height: Height,
        last_block_hash: BlockHash,
        proposer_id: NodeId,
        transactions: Vec<Transaction>,
        evidence: Vec<Vec<u8>>,
    ) -> Self {
        let hash = Self::compute_hash(
            height,
            &last_block_hash,
            proposer_id,
            &transactions,
            &evidence,
        );
        Self {
            header: BlockHeader {
                height,
                hash,
                last_block_hash,
                proposer_id,
            },
            transactions,
            evidence,
        }
    }

    /// The sealed hash
    #[must_use]
    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    /// Height of the block
    #[must_use]
    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Whether the sealed hash matches the contents.
    #[must_use]
    pub fn is_hash_consistent(&self) -> bool {
        self.header.hash
            == Self::compute_hash(
                self.header.height,
                &self.header.last_block_hash,
                self.header.proposer_id,
                &self.transactions,
                &self.evidence,
            )
    }

    /// SHA-256 over the header fields and the length-prefixed body entries
    fn compute_hash(
        height: Height,
        last_block_hash: &BlockHash,
        proposer_id: NodeId,
        transactions: &[Transaction],
        evidence: &[Vec<u8>],
    ) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(height.to_le_bytes());
        hasher.update(last_block_hash.0);
        hasher.update(proposer_id.0.to_le_bytes());
        for list in [transactions, evidence] {
            hasher.update((list.len() as u64).to_le_bytes());
            for item in list {
                hasher.update((item.len() as u64).to_le_bytes());
                hasher.update(item);
            }
        }
        BlockHash(hasher.finalize().into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_covers_body_and_header() {
        let block = Block::new(1, BlockHash::GENESIS, NodeId(1), vec![b"tx".to_vec()], vec![]);
        assert!(block.is_hash_consistent());

        let mut tampered = block.clone();
        tampered.transactions.push(b"extra".to_vec());
        assert!(!tampered.is_hash_consistent());

        let other_proposer = Block::new(1, BlockHash::GENESIS, NodeId(2), vec![b"tx".to_vec()], vec![]);
        assert_ne!(other_proposer.hash(), block.hash());
    }
}
