// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Testing infrastructure for `HotPokt`

#![cfg_attr(
    not(any(test, debug_assertions)),
    deprecated = "suspicious usage of testing/demo implementations in non-test/non-debug build"
)]

/// In memory network shared by the nodes of a test
pub mod memory_network;

/// Utility and persistence doubles
pub mod mocks;

/// Builds and drives a network of nodes
pub mod test_builder;

/// Waiting on node events
pub mod test_helpers;
