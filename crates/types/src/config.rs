// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Consensus configuration, loaded from TOML at startup.

use std::{collections::BTreeSet, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::{
    validator::{NodeId, Validator, ValidatorSet},
    view::Round,
};

/// Errors raised while loading or validating configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read
    ReadFile {
        /// path that failed
        path: String,
        /// io error
        source: std::io::Error,
    },
    /// The TOML did not parse
    ParseToml {
        /// parser error
        source: toml::de::Error,
    },
    /// A value is out of range
    #[snafu(display("invalid configuration value `{field}`: {reason}"))]
    InvalidValue {
        /// field name
        field: &'static str,
        /// what is wrong with it
        reason: String,
    },
    /// Two genesis validators share an id
    #[snafu(display("duplicate validator id {node_id}"))]
    DuplicateValidator {
        /// the repeated id
        node_id: NodeId,
    },
    /// The local node is missing from the validator set
    #[snafu(display("node {node_id} is not in the validator set"))]
    NotAValidator {
        /// the local id
        node_id: NodeId,
    },
}

/// How leaders are picked
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderElectionMethod {
    /// VRF sortition with binomial CDF, highest sortition wins
    #[default]
    VrfWithCdf,
    /// `validators[(height + round) % n]`
    RoundRobin,
}

/// Timing parameters of the pacemaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacemakerConfig {
    /// base view timeout
    pub timeout_msec: u64,
    /// extra delay added per doubling after each failed round
    pub retry_timeout_msec: u64,
    /// upper bound on the view timeout
    pub max_timeout_msec: u64,
    /// minimum time between two committed blocks
    pub min_block_freq_msec: u64,
    /// disable automatic view changes
    pub manual: bool,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            timeout_msec: 5000,
            retry_timeout_msec: 1000,
            max_timeout_msec: 60_000,
            min_block_freq_msec: 2000,
            manual: false,
        }
    }
}

impl PacemakerConfig {
    /// View timeout for `round`: `timeout + retry * (2^round - 1)`, capped at the maximum.
    #[must_use]
    pub fn timeout_for_round(&self, round: Round) -> Duration {
        let doublings = 1u64
            .checked_shl(u32::from(round))
            .map_or(u64::MAX, |factor| factor - 1);
        let backoff = self.retry_timeout_msec.saturating_mul(doublings);
        let msec = self
            .timeout_msec
            .saturating_add(backoff)
            .min(self.max_timeout_msec.max(self.timeout_msec));
        Duration::from_millis(msec)
    }

    /// Minimum time between two committed blocks
    #[must_use]
    pub fn min_block_interval(&self) -> Duration {
        Duration::from_millis(self.min_block_freq_msec)
    }
}

/// Everything the consensus core reads from configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// pacemaker timing
    pub pacemaker: PacemakerConfig,
    /// regenerate the VRF key every this many committed heights
    pub vrf_key_refresh_freq_blocks: u64,
    /// how many heights a VRF key stays valid for
    pub vrf_key_validity_blocks: u64,
    /// expected number of leader candidates per view
    pub num_expected_leaders: u64,
    /// election method
    pub leader_election: LeaderElectionMethod,
    /// bound on the encoded size of the per-round message pool
    pub max_mempool_bytes: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            pacemaker: PacemakerConfig::default(),
            vrf_key_refresh_freq_blocks: 5,
            vrf_key_validity_blocks: 5,
            num_expected_leaders: 3,
            leader_election: LeaderElectionMethod::default(),
            max_mempool_bytes: 500 * 1024 * 1024,
        }
    }
}

impl ConsensusConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// If the document does not parse or a value is out of range
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).context(ParseTomlSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// If the file cannot be read, does not parse, or a value is out of range
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the core cannot run with
    ///
    /// # Errors
    /// On the first out of range value
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pacemaker = &self.pacemaker;
        ensure!(
            pacemaker.timeout_msec > 0,
            InvalidValueSnafu {
                field: "pacemaker.timeout_msec",
                reason: "must be positive",
            }
        );
        ensure!(
            pacemaker.max_timeout_msec >= pacemaker.timeout_msec,
            InvalidValueSnafu {
                field: "pacemaker.max_timeout_msec",
                reason: format!(
                    "{} is below the base timeout {}",
                    pacemaker.max_timeout_msec, pacemaker.timeout_msec
                ),
            }
        );
        ensure!(
            pacemaker.retry_timeout_msec <= pacemaker.max_timeout_msec,
            InvalidValueSnafu {
                field: "pacemaker.retry_timeout_msec",
                reason: "exceeds the maximum timeout",
            }
        );
        ensure!(
            self.num_expected_leaders > 0,
            InvalidValueSnafu {
                field: "num_expected_leaders",
                reason: "must be positive",
            }
        );
        ensure!(
            self.vrf_key_validity_blocks >= self.vrf_key_refresh_freq_blocks
                && self.vrf_key_refresh_freq_blocks > 0,
            InvalidValueSnafu {
                field: "vrf_key_validity_blocks",
                reason: "keys must stay valid until the next refresh",
            }
        );
        Ok(())
    }

    /// Live VRF key announcements a validator may hold at once
    #[must_use]
    pub fn max_vrf_keys_per_validator(&self) -> usize {
        let keys = self
            .vrf_key_validity_blocks
            .div_ceil(self.vrf_key_refresh_freq_blocks.max(1))
            .saturating_add(1);
        usize::try_from(keys).unwrap_or(usize::MAX)
    }
}

/// Validator set at genesis
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// genesis validators
    pub validators: Vec<Validator>,
}

impl GenesisConfig {
    /// Build the validator set, rejecting reused ids
    ///
    /// # Errors
    /// If two validators share a [`NodeId`]
    pub fn validator_set(&self) -> Result<ValidatorSet, ConfigError> {
        let mut seen = BTreeSet::new();
        for validator in &self.validators {
            ensure!(
                seen.insert(validator.node_id),
                DuplicateValidatorSnafu {
                    node_id: validator.node_id
                }
            );
        }
        Ok(ValidatorSet::new(self.validators.iter().cloned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeouts_back_off_and_cap() {
        let config = PacemakerConfig {
            timeout_msec: 100,
            retry_timeout_msec: 10,
            max_timeout_msec: 500,
            min_block_freq_msec: 0,
            manual: false,
        };
        assert_eq!(config.timeout_for_round(0), Duration::from_millis(100));
        assert_eq!(config.timeout_for_round(1), Duration::from_millis(110));
        assert_eq!(config.timeout_for_round(3), Duration::from_millis(170));
        assert_eq!(config.timeout_for_round(10), Duration::from_millis(500));
        assert_eq!(config.timeout_for_round(255), Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ConsensusConfig::from_toml_str(
            r#"
            num_expected_leaders = 7
            leader_election = "RoundRobin"

            [pacemaker]
            timeout_msec = 50
            manual = true
            "#,
        )
        .unwrap();
        assert_eq!(config.num_expected_leaders, 7);
        assert_eq!(config.leader_election, LeaderElectionMethod::RoundRobin);
        assert_eq!(config.pacemaker.timeout_msec, 50);
        assert!(config.pacemaker.manual);
        assert_eq!(config.pacemaker.max_timeout_msec, 60_000);
        assert_eq!(config.vrf_key_validity_blocks, 5);
        assert_eq!(config.max_vrf_keys_per_validator(), 2);

        let config = ConsensusConfig {
            vrf_key_refresh_freq_blocks: 3,
            vrf_key_validity_blocks: 7,
            ..ConsensusConfig::default()
        };
        assert_eq!(config.max_vrf_keys_per_validator(), 4);
    }

    #[test]
    fn invalid_values_fail_fast() {
        let err = ConsensusConfig::from_toml_str("[pacemaker]\ntimeout_msec = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "pacemaker.timeout_msec",
                ..
            }
        ));
        assert!(ConsensusConfig::from_toml_str("num_expected_leaders = 0").is_err());
        assert!(ConsensusConfig::from_toml_str("pacemaker = 3").is_err());
    }
}
