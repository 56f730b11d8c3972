// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Traits for the collaborators the consensus core drives
pub mod metrics;
pub mod network;
pub mod persistence;
pub mod utility;

pub use network::{ConnectedNetwork, NetworkError};
pub use persistence::Persistence;
pub use utility::Utility;
