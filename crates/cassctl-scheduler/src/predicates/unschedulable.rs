//! Rejects cordoned nodes and nodes consumed earlier in the run.

use crate::model::{Taint, TaintEffect, Workload, UNSCHEDULABLE_TAINT_KEY};
use crate::snapshot::NodeRecord;

use super::{ClusterView, CycleState, Predicate, Status};

/// Excludes nodes that do not accept new workloads.
///
/// A cordoned node is admitted only if the workload tolerates the
/// `node.kubernetes.io/unschedulable:NoSchedule` taint. A node that already
/// received a proposed workload in this run is never admitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnschedulableExclusion;

impl Predicate for UnschedulableExclusion {
    fn name(&self) -> &'static str {
        "UnschedulableExclusion"
    }

    fn filter(
        &self,
        _view: &ClusterView<'_>,
        _state: &CycleState,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Status {
        if node.is_consumed() {
            return Status::unschedulable("node(s) already received a proposed workload");
        }
        if node.cordoned {
            let cordon = Taint::new(UNSCHEDULABLE_TAINT_KEY, "", TaintEffect::NoSchedule);
            if !workload.tolerates(&cordon) {
                return Status::unschedulable("node(s) were unschedulable");
            }
        }
        Status::Success
    }
}
