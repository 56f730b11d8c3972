// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Provides a rust implementation of the `HotPokt` proof of stake consensus core: a four phase
//! HotStuff state machine with a pacemaker, threshold signature quorum certificates and VRF
//! sortition leader election.

/// Contains types used by the crate
pub mod types;

/// Builds and spawns the consensus task
pub mod tasks;

use std::sync::Arc;

use async_broadcast::{broadcast, InactiveReceiver, Sender};
use async_lock::RwLock;
use hotpokt_task::task::ConsensusTaskRegistry;
pub use hotpokt_task_impls::events::ConsensusEvent;
/// Reexport error type
pub use hotpokt_types::error::HotPoktError;
use hotpokt_types::{
    block::BlockHash,
    config::{ConfigError, ConsensusConfig, GenesisConfig},
    traits::{
        metrics::{ConsensusMetricsValue, Metrics},
        ConnectedNetwork, Persistence, Utility,
    },
    validator::{ChainSnapshot, ChainView, NodeId},
    ValidatorConfig,
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    tasks::{add_consensus_task, ConsensusTaskParts},
    types::{Event, SystemContextHandle},
};

/// Capacity of the internal event bus
pub const EVENT_CHANNEL_SIZE: usize = 100_000;

/// Capacity of the output event stream
pub const EXTERNAL_EVENT_CHANNEL_SIZE: usize = 100_000;

/// Errors raised while bringing a node up
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum StartupError {
    /// The configuration or the genesis validator set was rejected
    #[snafu(display("invalid configuration: {source}"))]
    Config {
        /// underlying error
        source: ConfigError,
    },
    /// Persistence could not report the committed chain
    #[snafu(display("persistence could not report {what}: {message}"))]
    Persistence {
        /// the missing datum
        what: &'static str,
        /// what persistence said
        message: String,
    },
    /// The consensus task could not enter its first view
    #[snafu(display("could not start consensus: {message}"))]
    Start {
        /// what went wrong
        message: String,
    },
}

/// Holds the state needed to participate in `HotPokt` consensus
pub struct SystemContext {
    /// This node's id
    pub node_id: NodeId,

    /// Configuration items for this node
    pub config: ConsensusConfig,

    /// The underlying network
    pub network: Arc<dyn ConnectedNetwork>,

    /// Read side of the committed chain
    chain: ChainView,

    /// the metrics that the implementor is using.
    metrics: Arc<ConsensusMetricsValue>,

    /// Access to the output event stream.
    output_event_stream: (Sender<Event>, InactiveReceiver<Event>),

    /// access to the internal event stream, in case we need to, say, shut something down
    internal_event_stream: (
        Sender<Arc<ConsensusEvent>>,
        InactiveReceiver<Arc<ConsensusEvent>>,
    ),
}

impl SystemContext {
    /// Build a node, enter its first view and spawn the consensus task.
    ///
    /// The starting height comes from `persistence`: the height after the latest committed block,
    /// or genesis when nothing was committed yet. A node at genesis waits for `TriggerNextView`.
    ///
    /// # Errors
    /// If the configuration is invalid, the node is not a genesis validator, or persistence fails
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, target = "SystemContext", fields(id = %validator_config.node_id))]
    pub async fn init(
        validator_config: ValidatorConfig,
        config: ConsensusConfig,
        genesis: &GenesisConfig,
        network: Arc<dyn ConnectedNetwork>,
        utility: Arc<dyn Utility>,
        persistence: Arc<dyn Persistence>,
        metrics: &dyn Metrics,
    ) -> Result<SystemContextHandle, StartupError> {
        debug!("Creating a new hotpokt node");
        config.validate().context(ConfigSnafu)?;
        let validators = genesis.validator_set().context(ConfigSnafu)?;
        let node_id = validator_config.node_id;
        if !validators.contains(node_id) {
            return Err(StartupError::Config {
                source: ConfigError::NotAValidator { node_id },
            });
        }

        let latest_height = persistence.get_latest_block_height().map_err(|e| {
            StartupError::Persistence {
                what: "the latest block height",
                message: format!("{e:#}"),
            }
        })?;
        let latest_block_hash = if latest_height == 0 {
            BlockHash::GENESIS
        } else {
            persistence
                .get_block_hash(latest_height)
                .map_err(|e| StartupError::Persistence {
                    what: "the latest block hash",
                    message: format!("{e:#}"),
                })?
        };
        let (chain, chain_writer) = ChainView::new(ChainSnapshot {
            latest_height,
            latest_block_hash,
            validators: Arc::new(validators),
        });
        let start_height = if latest_height == 0 {
            0
        } else {
            latest_height.saturating_add(1)
        };
        info!("Starting at height {start_height} on top of block {latest_block_hash}");

        let (internal_tx, mut internal_rx) = broadcast(EVENT_CHANNEL_SIZE);
        let (mut external_tx, mut external_rx) = broadcast(EXTERNAL_EVENT_CHANNEL_SIZE);
        // Allow overflow on both channels, a slow receiver must not block consensus
        internal_rx.set_overflow(true);
        external_rx.set_overflow(true);
        // This makes it so we won't block on broadcasting if there is not a receiver
        external_tx.set_await_active(false);

        let context = Arc::new(SystemContext {
            node_id,
            config,
            network,
            chain,
            metrics: Arc::new(ConsensusMetricsValue::new(metrics)),
            output_event_stream: (external_tx, external_rx.deactivate()),
            internal_event_stream: (internal_tx.clone(), internal_rx.clone().deactivate()),
        });

        let mut state = ConsensusTaskParts {
            validator_config,
            start_height,
            chain_writer,
            utility,
        }
        .into_task_state(&context);
        state
            .start_consensus()
            .await
            .map_err(|e| StartupError::Start {
                message: format!("{e:#}"),
            })?;

        let mut registry = ConsensusTaskRegistry::new();
        add_consensus_task(&mut registry, state, internal_tx, internal_rx);

        Ok(SystemContextHandle {
            output_event_stream: context.output_event_stream.clone(),
            internal_event_stream: context.internal_event_stream.clone(),
            registry: Arc::new(RwLock::new(registry)),
            hotpokt: context,
        })
    }

    /// Read handle on the committed chain
    #[must_use]
    pub fn chain(&self) -> &ChainView {
        &self.chain
    }

    /// Metrics shared with the consensus task
    #[must_use]
    pub fn metrics(&self) -> Arc<ConsensusMetricsValue> {
        Arc::clone(&self.metrics)
    }
}
