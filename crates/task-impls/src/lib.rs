// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The consensus layer for `HotPokt`. This implements the four phase HotStuff protocol
//! in an event driven way

/// the task which implements the HotStuff state machine
pub mod consensus;

/// Defines the events passed between tasks
pub mod events;

/// Inert distributed key generation
pub mod dkg;

/// Helper functions used by any task
pub mod helpers;

/// Liveness: view timers and message admission
pub mod pacemaker;

/// Per round store of received HotStuff messages
pub mod pool;

/// Forming and checking quorum certificates
pub mod quorum;
