// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Collaborator doubles that keep everything in memory

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Context, Result};
use hotpokt_types::{
    block::{Block, BlockHash, Transaction},
    traits::{Persistence, Utility},
    view::Height,
};
use parking_lot::Mutex;

/// Work opened by `begin_block` and not yet ended
#[derive(Debug, Default)]
struct OpenBlock {
    /// height of the open unit of work
    height: Height,
    /// transactions applied so far
    delivered: Vec<Transaction>,
}

/// A utility module whose state is the list of committed blocks
#[derive(Debug, Default)]
pub struct MockUtility {
    /// transactions waiting for a block
    mempool: Mutex<Vec<Transaction>>,
    /// the unit of work in progress
    open: Mutex<Option<OpenBlock>>,
    /// committed blocks in order
    committed: Mutex<Vec<Block>>,
    /// transactions `deliver_tx` refuses
    poisoned: Mutex<Vec<Transaction>>,
    /// `end_block` refuses every block
    refuse_commits: Mutex<bool>,
}

impl MockUtility {
    /// A utility with `transactions` already in the mempool
    #[must_use]
    pub fn with_mempool(transactions: Vec<Transaction>) -> Self {
        Self {
            mempool: Mutex::new(transactions),
            ..Self::default()
        }
    }

    /// Make `deliver_tx` fail on `tx`
    pub fn poison(&self, tx: Transaction) {
        self.poisoned.lock().push(tx);
    }

    /// Make every `end_block` fail
    pub fn refuse_commits(&self) {
        *self.refuse_commits.lock() = true;
    }

    /// Blocks committed so far
    #[must_use]
    pub fn committed_blocks(&self) -> Vec<Block> {
        self.committed.lock().clone()
    }

    /// Transactions waiting for a block
    #[must_use]
    pub fn mempool(&self) -> Vec<Transaction> {
        self.mempool.lock().clone()
    }
}

impl Utility for MockUtility {
    fn reap_mempool(&self) -> Vec<Transaction> {
        self.mempool.lock().clone()
    }

    fn begin_block(&self, height: Height) -> Result<()> {
        // an interrupted round leaves its work open, starting over discards it
        *self.open.lock() = Some(OpenBlock {
            height,
            delivered: Vec::new(),
        });
        Ok(())
    }

    fn deliver_tx(&self, tx: &Transaction) -> Result<()> {
        ensure!(!self.poisoned.lock().contains(tx), "transaction {tx:?} is invalid");
        let mut open = self.open.lock();
        let open = open.as_mut().context("no block is open")?;
        open.delivered.push(tx.clone());
        Ok(())
    }

    fn end_block(&self, block: &Block) -> Result<()> {
        ensure!(!*self.refuse_commits.lock(), "commits are refused");
        let Some(open) = self.open.lock().take() else {
            bail!("no block is open");
        };
        ensure!(
            open.height == block.height() && open.delivered == block.transactions,
            "block {} does not match the delivered transactions",
            block.hash()
        );
        self.mempool
            .lock()
            .retain(|tx| !block.transactions.contains(tx));
        self.committed.lock().push(block.clone());
        Ok(())
    }

    fn check_transaction(&self, tx: Transaction) -> Result<()> {
        ensure!(!tx.is_empty(), "empty transaction");
        let mut mempool = self.mempool.lock();
        if !mempool.contains(&tx) {
            mempool.push(tx);
        }
        Ok(())
    }
}

/// A chain store seeded up front
#[derive(Debug, Default)]
pub struct MockPersistence {
    /// committed block hashes by height
    blocks: BTreeMap<Height, BlockHash>,
}

impl MockPersistence {
    /// A store holding `blocks`
    #[must_use]
    pub fn with_blocks(blocks: impl IntoIterator<Item = (Height, BlockHash)>) -> Self {
        Self {
            blocks: blocks.into_iter().collect(),
        }
    }
}

impl Persistence for MockPersistence {
    fn get_block_hash(&self, height: Height) -> Result<BlockHash> {
        self.blocks
            .get(&height)
            .copied()
            .with_context(|| format!("no block at height {height}"))
    }

    fn get_latest_block_height(&self) -> Result<Height> {
        Ok(self.blocks.last_key_value().map_or(0, |(height, _)| *height))
    }
}
