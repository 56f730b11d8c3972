// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The [`Metrics`] trait is used to collect information from the consensus core.
//!
//! This trait can be used to spawn the following traits:
//! - [`Counter`]: an ever-increasing value (example usage: committed blocks)
//! - [`Gauge`]: a value that store the latest value, and can go up and down (example usage: current round)

use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::view::View;

/// The metrics type.
pub trait Metrics: Send + Sync + DynClone + Debug {
    /// Create a [`Counter`] with an optional `unit_label`.
    ///
    /// The `unit_label` can be used to indicate what the unit of the value is, e.g. "kb" or "seconds"
    fn create_counter(&self, name: String, unit_label: Option<String>) -> Box<dyn Counter>;
    /// Create a [`Gauge`] with an optional `unit_label`.
    ///
    /// The `unit_label` can be used to indicate what the unit of the value is, e.g. "kb" or "seconds"
    fn create_gauge(&self, name: String, unit_label: Option<String>) -> Box<dyn Gauge>;

    /// Create a subgroup with a specified prefix.
    fn subgroup(&self, subgroup_name: String) -> Box<dyn Metrics>;
}

/// Use this if you're not planning to use any metrics. All methods are implemented as a no-op
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMetrics;

impl NoMetrics {
    /// Create a new `Box<dyn Metrics>` with this [`NoMetrics`]
    #[must_use]
    pub fn boxed() -> Box<dyn Metrics> {
        Box::<Self>::default()
    }
}

impl Metrics for NoMetrics {
    fn create_counter(&self, _: String, _: Option<String>) -> Box<dyn Counter> {
        Box::new(NoMetrics)
    }

    fn create_gauge(&self, _: String, _: Option<String>) -> Box<dyn Gauge> {
        Box::new(NoMetrics)
    }

    fn subgroup(&self, _: String) -> Box<dyn Metrics> {
        Box::new(NoMetrics)
    }
}

impl Counter for NoMetrics {
    fn add(&self, _: usize) {}
}
impl Gauge for NoMetrics {
    fn set(&self, _: usize) {}
    fn update(&self, _: i64) {}
}

/// An ever-incrementing counter
pub trait Counter: Send + Sync + Debug + DynClone {
    /// Add a value to the counter
    fn add(&self, amount: usize);
}

/// A gauge that stores the latest value.
pub trait Gauge: Send + Sync + Debug + DynClone {
    /// Set the gauge value
    fn set(&self, amount: usize);

    /// Update the gauge value
    fn update(&self, delta: i64);
}

dyn_clone::clone_trait_object!(Metrics);
dyn_clone::clone_trait_object!(Gauge);
dyn_clone::clone_trait_object!(Counter);

/// The consensus metrics we're interested in
#[derive(Clone, Debug)]
pub struct ConsensusMetricsValue {
    /// Height of the latest committed block
    pub committed_height: Box<dyn Gauge>,
    /// The height the node is working on
    pub current_height: Box<dyn Gauge>,
    /// The current round
    pub current_round: Box<dyn Gauge>,
    /// The current step, as its protocol index
    pub current_step: Box<dyn Gauge>,
    /// Number of views that timed out
    pub number_of_timeouts: Box<dyn Counter>,
    /// Number of rounds interrupted by a validation failure
    pub number_of_interrupts: Box<dyn Counter>,
    /// Number of blocks committed
    pub number_of_blocks_committed: Box<dyn Counter>,
    /// Number of views in which no leader could be elected
    pub number_of_leaderless_views: Box<dyn Counter>,
}

impl ConsensusMetricsValue {
    /// Create a new instance of this [`ConsensusMetricsValue`] struct, setting all the counters and gauges
    #[must_use]
    pub fn new(metrics: &dyn Metrics) -> Self {
        Self {
            committed_height: metrics.create_gauge(String::from("committed_height"), None),
            current_height: metrics.create_gauge(String::from("current_height"), None),
            current_round: metrics.create_gauge(String::from("current_round"), None),
            current_step: metrics.create_gauge(String::from("current_step"), None),
            number_of_timeouts: metrics.create_counter(String::from("number_of_timeouts"), None),
            number_of_interrupts: metrics
                .create_counter(String::from("number_of_interrupts"), None),
            number_of_blocks_committed: metrics
                .create_counter(String::from("number_of_blocks_committed"), None),
            number_of_leaderless_views: metrics
                .create_counter(String::from("number_of_leaderless_views"), None),
        }
    }
}

impl ConsensusMetricsValue {
    /// Point the view gauges at `view`
    pub fn record_view(&self, view: View) {
        self.current_height
            .set(usize::try_from(view.height).unwrap_or(usize::MAX));
        self.current_round.set(usize::from(view.round));
        self.current_step.set(view.step as usize);
    }
}

impl Default for ConsensusMetricsValue {
    fn default() -> Self {
        Self::new(&*NoMetrics::boxed())
    }
}
