// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

mod handle;

pub use handle::SystemContextHandle;
pub use hotpokt_types::{
    event::{Event, NodeState},
    message::{ConsensusMessage, DebugMessage},
};
