//! Types for the scheduler crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Result, SchedulerError};

/// How the topology index is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// Reuse the point-in-time pod listing taken for the snapshot.
    #[default]
    Snapshot,
    /// Populate the index from a pod watch stream until its initial sync completes.
    Live,
}

impl TopologyMode {
    /// Parse a mode name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "snapshot" => Some(Self::Snapshot),
            "live" | "watch" => Some(Self::Live),
            _ => None,
        }
    }
}

/// Configuration for a feasibility simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Upper bound for listing nodes and pods, in seconds.
    pub list_timeout_secs: u64,
    /// Upper bound for the topology index initial sync, in seconds.
    pub sync_timeout_secs: u64,
    /// How the topology index is populated.
    pub topology_mode: TopologyMode,
    /// Optional label selector restricting the pods watched in live mode.
    pub pod_label_selector: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            list_timeout_secs: 30,
            sync_timeout_secs: 30,
            topology_mode: TopologyMode::Snapshot,
            pod_label_selector: None,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `CASSCTL_LIST_TIMEOUT_SECS`: listing timeout
    /// - `CASSCTL_SYNC_TIMEOUT_SECS`: topology sync timeout
    /// - `CASSCTL_TOPOLOGY_MODE`: `snapshot` or `live`
    /// - `CASSCTL_POD_LABEL_SELECTOR`: label selector for the live index
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CASSCTL_LIST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.list_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("CASSCTL_SYNC_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.sync_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("CASSCTL_TOPOLOGY_MODE") {
            if let Some(mode) = TopologyMode::parse(&val) {
                config.topology_mode = mode;
            }
        }
        if let Ok(val) = std::env::var("CASSCTL_POD_LABEL_SELECTOR") {
            if !val.is_empty() {
                config.pod_label_selector = Some(val);
            }
        }

        config
    }

    /// Check that both timeouts are positive.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.list_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "list timeout must be at least one second".to_string(),
            ));
        }
        if self.sync_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "sync timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Listing timeout as a [`Duration`].
    #[must_use]
    pub const fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    /// Topology sync timeout as a [`Duration`].
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Outcome of a feasibility simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every workload was placed.
    Feasible,
    /// Placement stopped at the first workload no node could host.
    Infeasible {
        /// Number of workloads in the batch.
        requested: usize,
        /// Number placed before the first failure.
        schedulable: usize,
    },
}

impl Verdict {
    /// Whether every workload was placed.
    #[must_use]
    pub const fn is_feasible(&self) -> bool {
        matches!(self, Self::Feasible)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feasible => f.write_str("all the pods can be scheduled"),
            Self::Infeasible {
                requested,
                schedulable,
            } => write!(
                f,
                "unable to schedule all the pods, requested: {requested}, schedulable: {schedulable}"
            ),
        }
    }
}

/// A workload bound to a node during the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Position of the workload in the batch.
    pub index: usize,
    /// Workload name.
    pub workload: String,
    /// Node the workload was placed on.
    pub node: String,
}

/// Full result of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// The verdict.
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Placements in batch order.
    pub assignments: Vec<Assignment>,
    /// Index of the first workload that could not be placed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_unplaced: Option<usize>,
}

impl SimulationReport {
    /// Whether every workload was placed.
    #[must_use]
    pub const fn is_feasible(&self) -> bool {
        self.verdict.is_feasible()
    }
}
