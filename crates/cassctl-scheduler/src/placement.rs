//! Greedy first-fit placement.
//!
//! Workloads are placed one at a time, in batch order. Each workload goes to
//! the first node, in listing order, that passes the whole predicate chain.
//! A node that receives a workload is consumed and takes no further
//! proposals in the same run. There is no backtracking: the first workload
//! that fits nowhere ends the run with an infeasible verdict.

use std::sync::Arc;

use tracing::{debug, info};

use crate::model::Workload;
use crate::predicates::{ClusterView, PredicateChain, Rejection};
use crate::snapshot::Snapshot;
use crate::topology::TopologyIndex;
use crate::types::{Assignment, SimulationReport, Verdict};
use crate::{Result, SchedulerError};

/// Mutable state of one simulation run.
///
/// The session owns its snapshot; dropping it discards every placement.
#[derive(Debug)]
pub struct Session<'t> {
    snapshot: Snapshot,
    topology: &'t TopologyIndex,
    workloads: Vec<Arc<Workload>>,
    assignments: Vec<Assignment>,
    first_unplaced: Option<usize>,
}

impl<'t> Session<'t> {
    /// Start a run over `snapshot` for the given batch.
    #[must_use]
    pub fn new(snapshot: Snapshot, topology: &'t TopologyIndex, workloads: &[Workload]) -> Self {
        Self {
            snapshot,
            topology,
            workloads: workloads.iter().cloned().map(Arc::new).collect(),
            assignments: Vec::with_capacity(workloads.len()),
            first_unplaced: None,
        }
    }

    /// The snapshot with every placement made so far.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Number of workloads placed so far.
    #[must_use]
    pub fn placed(&self) -> usize {
        self.assignments.len()
    }

    /// Number of workloads in the batch.
    #[must_use]
    pub fn requested(&self) -> usize {
        self.workloads.len()
    }

    /// Placements made so far, in batch order.
    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Index of the workload that could not be placed, if any.
    #[must_use]
    pub const fn first_unplaced(&self) -> Option<usize> {
        self.first_unplaced
    }

    /// Current verdict of the run.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        match self.first_unplaced {
            None => Verdict::Feasible,
            Some(_) => Verdict::Infeasible {
                requested: self.workloads.len(),
                schedulable: self.assignments.len(),
            },
        }
    }

    /// Finish the run and produce its report.
    #[must_use]
    pub fn into_report(self) -> SimulationReport {
        SimulationReport {
            verdict: self.verdict(),
            assignments: self.assignments,
            first_unplaced: self.first_unplaced,
        }
    }
}

/// Runs the predicate chain over a session.
#[derive(Debug, Default)]
pub struct PlacementEngine {
    chain: PredicateChain,
}

impl PlacementEngine {
    /// Create an engine with a custom predicate chain.
    #[must_use]
    pub const fn new(chain: PredicateChain) -> Self {
        Self { chain }
    }

    /// The predicate chain in use.
    #[must_use]
    pub const fn chain(&self) -> &PredicateChain {
        &self.chain
    }

    /// Place the session's workloads until one fails or all are placed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Predicate`] if a predicate reports a
    /// malformed workload. Infeasibility is not an error.
    pub fn run(&self, session: &mut Session<'_>) -> Result<Verdict> {
        let workloads = session.workloads.clone();
        for (index, workload) in workloads.iter().enumerate() {
            match self.place_one(session, workload)? {
                Some(node) => {
                    debug!(index, workload = %workload.name, node = %node, "Placed workload");
                    session.assignments.push(Assignment {
                        index,
                        workload: workload.name.clone(),
                        node,
                    });
                }
                None => {
                    info!(index, workload = %workload.name, "No node can host workload");
                    session.first_unplaced = Some(index);
                    break;
                }
            }
        }
        Ok(session.verdict())
    }

    /// Find the first passing node for one workload and bind it there.
    fn place_one(&self, session: &mut Session<'_>, workload: &Arc<Workload>) -> Result<Option<String>> {
        let found = {
            let view = ClusterView::new(session.snapshot.nodes(), session.topology);
            let prepared = self
                .chain
                .pre_filter(&view, workload)
                .map_err(|r| predicate_error(r, workload))?;

            let mut found = None;
            for (i, node) in view.nodes().iter().enumerate() {
                match self.chain.filter(&view, &prepared, workload, node) {
                    Ok(()) => {
                        found = Some(i);
                        break;
                    }
                    Err(rejection) if rejection.is_error() => {
                        return Err(predicate_error(rejection, workload));
                    }
                    Err(rejection) => {
                        debug!(
                            workload = %workload.name,
                            node = %node.name,
                            predicate = rejection.predicate,
                            reason = rejection.status.message().unwrap_or_default(),
                            "Node rejected"
                        );
                    }
                }
            }
            found
        };

        Ok(found.map(|i| {
            let node = &mut session.snapshot.nodes_mut()[i];
            node.place(Arc::clone(workload));
            node.name.clone()
        }))
    }
}

fn predicate_error(rejection: Rejection, workload: &Workload) -> SchedulerError {
    SchedulerError::Predicate {
        predicate: rejection.predicate,
        workload: workload.name.clone(),
        message: rejection.status.to_string(),
    }
}

/// Run the standard chain over a snapshot and return the report.
///
/// # Errors
///
/// See [`PlacementEngine::run`].
pub fn simulate(
    snapshot: Snapshot,
    topology: &TopologyIndex,
    workloads: &[Workload],
) -> Result<SimulationReport> {
    let mut session = Session::new(snapshot, topology, workloads);
    PlacementEngine::default().run(&mut session)?;
    Ok(session.into_report())
}
