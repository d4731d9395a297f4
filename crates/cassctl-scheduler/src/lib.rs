//! Scheduling feasibility simulator for Cassandra pods on Kubernetes.
//!
//! This crate answers "would these pods fit right now?" without creating
//! anything in the cluster. It:
//!
//! - Lists nodes and pods and builds a point-in-time [`Snapshot`]
//! - Indexes running workloads by node for inter-workload affinity
//! - Runs an ordered [`PredicateChain`] for every (workload, node) pair
//! - Places workloads greedily, one per node, and reports a [`Verdict`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Estimator                               │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!   ┌───────────────────────┐     ┌───────────────────────┐
//!   │ ClusterStateProvider  │     │   PlacementEngine     │
//!   │  list nodes / pods    │     │   greedy first-fit    │
//!   │  topology index       │     │                       │
//!   └───────────────────────┘     └───────────────────────┘
//!               │                             │
//!               ▼                             ▼
//!   ┌───────────────────────┐     ┌───────────────────────┐
//!   │ Snapshot              │◄────│   PredicateChain      │
//!   │ TopologyIndex         │     │   pre-filter, filter  │
//!   └───────────────────────┘     └───────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cassctl_scheduler::{Estimator, KubeClusterState, SimulationConfig, WorkloadProfile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimulationConfig::from_env();
//! let provider = KubeClusterState::new(config.clone()).await?;
//! let estimator = Estimator::new(provider, config);
//!
//! // Four Cassandra pods, 2 CPU / 2Gi each
//! let profile = WorkloadProfile::new(2000, 2 * 1024 * 1024 * 1024);
//! let report = estimator.estimate_uniform(4, &profile).await?;
//! println!("{}", report.verdict);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils`
//! feature and use the in-memory provider:
//!
//! ```ignore
//! use cassctl_scheduler::mock::{self, StaticClusterState};
//! use cassctl_scheduler::{Estimator, SimulationConfig, WorkloadProfile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StaticClusterState::new(vec![mock::node("node1", "4", "8Gi")], vec![]);
//! let estimator = Estimator::new(provider, SimulationConfig::default());
//! let report = estimator
//!     .estimate_uniform(1, &WorkloadProfile::new(2000, 1 << 30))
//!     .await?;
//! assert!(report.is_feasible());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod estimator;
pub mod k8s;
pub mod model;
pub mod placement;
pub mod pod;
pub mod predicates;
pub mod selector;
pub mod snapshot;
pub mod topology;
pub mod types;

pub use error::{Result, SchedulerError};
pub use estimator::Estimator;
pub use k8s::{ClusterStateProvider, KubeClusterState};
pub use model::{
    AffinityKind, Taint, TaintEffect, Toleration, TolerationOperator, Workload,
    WorkloadAffinityTerm, WorkloadProfile,
};
pub use placement::{simulate, PlacementEngine, Session};
pub use predicates::{Predicate, PredicateChain, Status};
pub use selector::{LabelSelector, NodeSelectorTerm, Requirement, SelectorOperator};
pub use snapshot::{NodeRecord, Snapshot};
pub use topology::TopologyIndex;
pub use types::{Assignment, SimulationConfig, SimulationReport, TopologyMode, Verdict};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock;
