// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Read access to committed blocks

use std::fmt::Debug;

use crate::{block::BlockHash, view::Height};

/// Read side of block storage
pub trait Persistence: Send + Sync + Debug + 'static {
    /// Hash of the block committed at `height`; the genesis hash for height 0
    ///
    /// # Errors
    /// If no block exists at `height`
    fn get_block_hash(&self, height: Height) -> anyhow::Result<BlockHash>;

    /// Height of the latest committed block, 0 at genesis
    ///
    /// # Errors
    /// If the store cannot be read
    fn get_latest_block_height(&self) -> anyhow::Result<Height>;
}
