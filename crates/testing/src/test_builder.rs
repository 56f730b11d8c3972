// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::sync::Arc;

use async_broadcast::Receiver;
use hotpokt::{types::SystemContextHandle, StartupError, SystemContext};
use hotpokt_types::{
    block::{BlockHash, Transaction},
    config::{ConsensusConfig, GenesisConfig, LeaderElectionMethod, PacemakerConfig},
    event::Event,
    message::{ConsensusMessage, DebugMessage},
    traits::{metrics::NoMetrics, Utility},
    validator::{NodeId, StakeAmount},
    view::Height,
    ValidatorConfig,
};
use tokio::{spawn, task::JoinHandle};
use tracing::warn;

use crate::{
    memory_network::{MasterMap, MemoryNetwork},
    mocks::{MockPersistence, MockUtility},
};

/// Seed all test keys derive from
pub const TEST_SEED: [u8; 32] = [0u8; 32];

/// data describing how a network of nodes should be built
#[derive(Clone, Debug)]
pub struct TestDescription {
    /// Total number of nodes in the test
    pub num_nodes: u64,
    /// stake of every node
    pub stake: StakeAmount,
    /// consensus parameters shared by every node
    pub config: ConsensusConfig,
    /// transactions waiting in every node's mempool
    pub mempool: Vec<Transaction>,
    /// blocks every node has already committed, by height
    pub committed: Vec<(Height, BlockHash)>,
}

impl Default for TestDescription {
    /// Four validators of equal stake, round robin leaders and short timeouts
    fn default() -> Self {
        Self {
            num_nodes: 4,
            stake: 100,
            config: ConsensusConfig {
                pacemaker: PacemakerConfig {
                    timeout_msec: 2_000,
                    retry_timeout_msec: 100,
                    max_timeout_msec: 10_000,
                    min_block_freq_msec: 0,
                    manual: false,
                },
                leader_election: LeaderElectionMethod::RoundRobin,
                ..ConsensusConfig::default()
            },
            mempool: vec![b"tx-1".to_vec(), b"tx-2".to_vec()],
            committed: Vec::new(),
        }
    }
}

/// A running node of a test network
pub struct TestNode {
    /// handle on the node
    pub handle: SystemContextHandle,
    /// the node's utility double
    pub utility: Arc<MockUtility>,
    /// the node's output events
    pub events: Receiver<Event>,
    /// forwards the node's inbound envelopes into `handle`
    forwarder: JoinHandle<()>,
}

impl TestNode {
    /// This node's id
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.handle.node_id()
    }

    /// Send an operator command to this node
    pub async fn debug(&self, command: DebugMessage) {
        self.handle
            .dispatch_message(ConsensusMessage::Debug(command))
            .await;
    }
}

/// The nodes of a test and the network connecting them
pub struct TestNetwork {
    /// the nodes, in [`NodeId`] order
    pub nodes: Vec<TestNode>,
    /// the shared network
    pub master_map: Arc<MasterMap>,
}

impl TestDescription {
    /// Validator configs for every node, ids starting at 1
    #[must_use]
    pub fn validator_configs(&self) -> Vec<ValidatorConfig> {
        (1..=self.num_nodes)
            .map(|i| ValidatorConfig::generated_from_seed_indexed(TEST_SEED, NodeId(i), self.stake))
            .collect()
    }

    /// Start every node on top of `committed` over a fresh in memory network, paused when `paused`
    /// is set
    ///
    /// # Errors
    /// If a node fails to start
    pub async fn launch(self, paused: bool) -> Result<TestNetwork, StartupError> {
        let configs = self.validator_configs();
        let genesis = GenesisConfig {
            validators: configs.iter().map(ValidatorConfig::validator).collect(),
        };
        let master_map = MasterMap::new();
        if paused {
            master_map.pause();
        }

        let mut nodes = Vec::with_capacity(configs.len());
        for validator_config in configs {
            let (network, mut inbound) = MemoryNetwork::new(validator_config.node_id, &master_map);
            let utility = Arc::new(MockUtility::with_mempool(self.mempool.clone()));
            let handle = SystemContext::init(
                validator_config,
                self.config.clone(),
                &genesis,
                Arc::new(network),
                Arc::clone(&utility) as Arc<dyn Utility>,
                Arc::new(MockPersistence::with_blocks(self.committed.iter().copied())),
                &NoMetrics,
            )
            .await?;
            let events = handle.get_event_stream();

            let forward_to = handle.clone();
            let forwarder = spawn(async move {
                while let Some(envelope) = inbound.recv().await {
                    if let Err(e) = forward_to.dispatch(&envelope).await {
                        warn!("Dropping undecodable envelope: {e}");
                    }
                }
            });
            nodes.push(TestNode {
                handle,
                utility,
                events,
                forwarder,
            });
        }
        Ok(TestNetwork { nodes, master_map })
    }
}

impl TestNetwork {
    /// Send an operator command to every node
    pub async fn debug_all(&self, command: DebugMessage) {
        for node in &self.nodes {
            node.debug(command).await;
        }
    }

    /// Stop forwarding and shut every node down
    pub async fn shut_down(self) {
        for node in self.nodes {
            node.forwarder.abort();
            node.handle.shut_down().await;
        }
    }
}
