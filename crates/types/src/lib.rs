// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Types and Traits for the `HotPokt` consensus core

pub mod block;
pub mod config;
pub mod election;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod signature_key;
pub mod traits;
pub mod validator;
pub mod view;
pub mod vrf;

use serde::{Deserialize, Serialize};

use crate::{
    signature_key::SignatureKeyPair,
    validator::{NodeId, StakeAmount, Validator},
    vrf::VrfSecretKey,
};

/// Holds configuration for a validator node: its identity, signing key and stake
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// The validator's id
    pub node_id: NodeId,
    /// The validator's signing key pair, should never leave the node
    pub key_pair: SignatureKeyPair,
    /// The validator's stake
    pub stake: StakeAmount,
    /// Address peers reach this validator at
    pub service_address: String,
}

impl ValidatorConfig {
    /// generate validator config from input seed, index and stake
    #[must_use]
    pub fn generated_from_seed_indexed(seed: [u8; 32], node_id: NodeId, stake: StakeAmount) -> Self {
        Self {
            node_id,
            key_pair: SignatureKeyPair::generated_from_seed_indexed(seed, node_id.0),
            stake,
            service_address: format!("node{node_id}.consensus:42069"),
        }
    }

    /// The genesis VRF key of this validator
    #[must_use]
    pub fn genesis_vrf_key(&self) -> VrfSecretKey {
        VrfSecretKey::derive(&self.key_pair.private_key_bytes(), 0)
    }

    /// The public entry other validators know this node by
    #[must_use]
    pub fn validator(&self) -> Validator {
        Validator {
            node_id: self.node_id,
            public_key: self.key_pair.public_key(),
            vrf_verification_key: self.genesis_vrf_key().verification_key(),
            stake: self.stake,
            service_address: self.service_address.clone(),
        }
    }
}
