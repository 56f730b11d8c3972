// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The transaction execution collaborator

use std::fmt::Debug;

use crate::{
    block::{Block, Transaction},
    view::Height,
};

/// Executes transactions on behalf of consensus.
///
/// A block's worth of work is bracketed by [`Utility::begin_block`] and
/// [`Utility::end_block`]. Beginning a block discards any unit of work left open by an
/// interrupted round.
pub trait Utility: Send + Sync + Debug + 'static {
    /// Transactions to put in the next block
    fn reap_mempool(&self) -> Vec<Transaction>;

    /// Open a unit of work for a block at `height`
    ///
    /// # Errors
    /// If the unit of work cannot be opened
    fn begin_block(&self, height: Height) -> anyhow::Result<()>;

    /// Apply one transaction to the open unit of work
    ///
    /// # Errors
    /// If the transaction is invalid
    fn deliver_tx(&self, tx: &Transaction) -> anyhow::Result<()>;

    /// Finalise the open unit of work for `block`, persisting it
    ///
    /// # Errors
    /// If the state transition cannot be committed
    fn end_block(&self, block: &Block) -> anyhow::Result<()>;

    /// Admit a gossiped transaction to the mempool
    ///
    /// # Errors
    /// If the transaction is rejected
    fn check_transaction(&self, tx: Transaction) -> anyhow::Result<()>;
}
