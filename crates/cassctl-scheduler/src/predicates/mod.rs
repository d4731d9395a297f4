//! Feasibility predicates.
//!
//! A [`Predicate`] decides whether a workload may be admitted to a node.
//! Each predicate has optional validate and pre-filter stages, run once per
//! workload before any node is tried, and a filter stage run per candidate
//! node. Malformed input is therefore rejected even when no node is left to
//! try.
//!
//! The [`PredicateChain`] runs the predicates in a fixed order:
//!
//! 1. [`UnschedulableExclusion`]
//! 2. [`ResourceFit`]
//! 3. [`NodeAffinity`]
//! 4. [`InterWorkloadAffinity`]
//! 5. [`TaintToleration`]
//!
//! The order only affects which predicate reports a rejection, never
//! whether a node is rejected.

use std::fmt;
use std::sync::Arc;

use crate::model::{Workload, WorkloadAffinityTerm};
use crate::snapshot::NodeRecord;
use crate::topology::TopologyIndex;

mod inter_workload;
mod node_affinity;
mod resource_fit;
mod taint_toleration;
mod unschedulable;

pub use inter_workload::InterWorkloadAffinity;
pub use node_affinity::NodeAffinity;
pub use resource_fit::ResourceFit;
pub use taint_toleration::TaintToleration;
pub use unschedulable::UnschedulableExclusion;

/// Result of a single predicate stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The stage passed.
    Success,
    /// The predicate has nothing to check for this workload.
    Skip,
    /// The node cannot host the workload.
    Unschedulable(String),
    /// The input is malformed; the simulation must stop.
    Error(String),
}

impl Status {
    /// Shorthand for an unschedulable status.
    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::Unschedulable(reason.into())
    }

    /// Shorthand for an error status.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Whether the status is [`Status::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The reason or message carried by the status, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Unschedulable(m) | Self::Error(m) => Some(m),
            Self::Success | Self::Skip => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Skip => f.write_str("Skip"),
            Self::Unschedulable(reason) => write!(f, "Unschedulable: {reason}"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Per-workload state written by pre-filters and read by filters.
#[derive(Debug, Default)]
pub struct CycleState {
    /// Validated inter-workload affinity terms of the workload.
    pub affinity_terms: Vec<WorkloadAffinityTerm>,
}

/// Read-only view of the cluster handed to predicates.
#[derive(Debug, Clone, Copy)]
pub struct ClusterView<'a> {
    nodes: &'a [NodeRecord],
    topology: &'a TopologyIndex,
}

impl<'a> ClusterView<'a> {
    /// Create a view over node records and the topology index.
    #[must_use]
    pub const fn new(nodes: &'a [NodeRecord], topology: &'a TopologyIndex) -> Self {
        Self { nodes, topology }
    }

    /// All node records, in listing order.
    #[must_use]
    pub const fn nodes(&self) -> &'a [NodeRecord] {
        self.nodes
    }

    /// The topology index.
    #[must_use]
    pub const fn topology(&self) -> &'a TopologyIndex {
        self.topology
    }

    /// Running and already-placed workloads on a node.
    #[must_use]
    pub fn workloads_on(&self, node: &NodeRecord) -> Vec<Arc<Workload>> {
        let mut workloads = self.topology.workloads_on(&node.name);
        workloads.extend(node.placed().iter().cloned());
        workloads
    }

    /// Nodes whose `key` label equals `value`.
    pub fn nodes_in_domain<'s>(
        &'s self,
        key: &'s str,
        value: &'s str,
    ) -> impl Iterator<Item = &'a NodeRecord> + 's {
        self.nodes
            .iter()
            .filter(move |n| n.labels.get(key).is_some_and(|v| v == value))
    }
}

/// A feasibility check for one workload against one node.
pub trait Predicate: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Check the workload's own fields for this predicate.
    ///
    /// Runs before [`Predicate::pre_filter`]. Anything other than
    /// `Success` aborts the simulation.
    fn validate(&self, _workload: &Workload) -> Status {
        Status::Success
    }

    /// Run once per workload before any node is tried.
    ///
    /// Returning [`Status::Skip`] disables [`Predicate::filter`] for the
    /// rest of this workload's node search. Anything other than
    /// `Success` or `Skip` aborts the simulation.
    fn pre_filter(
        &self,
        _view: &ClusterView<'_>,
        _workload: &Workload,
        _state: &mut CycleState,
    ) -> Status {
        Status::Success
    }

    /// Decide whether `node` can host `workload`.
    fn filter(
        &self,
        view: &ClusterView<'_>,
        state: &CycleState,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Status;
}

/// A non-successful predicate result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the predicate that rejected.
    pub predicate: &'static str,
    /// The status it returned.
    pub status: Status,
}

impl Rejection {
    /// Whether the rejection must abort the simulation.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, Status::Error(_))
    }
}

/// Pre-filter results for one workload.
#[derive(Debug)]
pub struct PreparedWorkload {
    state: CycleState,
    enabled: Vec<bool>,
}

impl PreparedWorkload {
    /// Names of the predicates that will run their filter stage.
    #[must_use]
    pub fn enabled<'c>(&self, chain: &'c PredicateChain) -> Vec<&'c str> {
        chain
            .predicates
            .iter()
            .zip(&self.enabled)
            .filter_map(|(p, enabled)| enabled.then(|| p.name()))
            .collect()
    }
}

/// An ordered list of predicates.
pub struct PredicateChain {
    predicates: Vec<Box<dyn Predicate>>,
}

impl Default for PredicateChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for PredicateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.predicates.iter().map(|p| p.name()))
            .finish()
    }
}

impl PredicateChain {
    /// The standard chain in its fixed order.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(UnschedulableExclusion),
            Box::new(ResourceFit),
            Box::new(NodeAffinity),
            Box::new(InterWorkloadAffinity),
            Box::new(TaintToleration),
        ])
    }

    /// A chain running `predicates` in the given order.
    #[must_use]
    pub fn new(predicates: Vec<Box<dyn Predicate>>) -> Self {
        Self { predicates }
    }

    /// Predicate names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.predicates.iter().map(|p| p.name()).collect()
    }

    /// Run every validate and pre-filter stage once for a workload.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure, or the first pre-filter
    /// result other than `Success` or `Skip`.
    pub fn pre_filter(
        &self,
        view: &ClusterView<'_>,
        workload: &Workload,
    ) -> Result<PreparedWorkload, Rejection> {
        let mut state = CycleState::default();
        let mut enabled = Vec::with_capacity(self.predicates.len());

        for predicate in &self.predicates {
            let validated = predicate.validate(workload);
            if !validated.is_success() {
                return Err(Rejection {
                    predicate: predicate.name(),
                    status: validated,
                });
            }

            match predicate.pre_filter(view, workload, &mut state) {
                Status::Success => enabled.push(true),
                Status::Skip => enabled.push(false),
                status => {
                    return Err(Rejection {
                        predicate: predicate.name(),
                        status,
                    })
                }
            }
        }

        Ok(PreparedWorkload { state, enabled })
    }

    /// Run the filters for one node, stopping at the first rejection.
    ///
    /// # Errors
    ///
    /// Returns the first filter result that is neither `Success` nor `Skip`.
    pub fn filter(
        &self,
        view: &ClusterView<'_>,
        prepared: &PreparedWorkload,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Result<(), Rejection> {
        let active = self
            .predicates
            .iter()
            .zip(&prepared.enabled)
            .filter_map(|(p, enabled)| enabled.then_some(p));

        for predicate in active {
            match predicate.filter(view, &prepared.state, workload, node) {
                Status::Success | Status::Skip => {}
                status => {
                    return Err(Rejection {
                        predicate: predicate.name(),
                        status,
                    })
                }
            }
        }
        Ok(())
    }
}
