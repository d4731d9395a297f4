//! Taint toleration.

use crate::model::{Toleration, Workload};
use crate::snapshot::NodeRecord;

use super::{ClusterView, CycleState, Predicate, Status};

/// Every `NoSchedule` or `NoExecute` taint on the node must be tolerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaintToleration;

impl Predicate for TaintToleration {
    fn name(&self) -> &'static str {
        "TaintToleration"
    }

    fn validate(&self, workload: &Workload) -> Status {
        match workload.tolerations.iter().try_for_each(Toleration::validate) {
            Ok(()) => Status::Success,
            Err(e) => Status::error(e),
        }
    }

    fn filter(
        &self,
        _view: &ClusterView<'_>,
        _state: &CycleState,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Status {
        match node
            .taints
            .iter()
            .filter(|t| t.effect.is_blocking())
            .find(|t| !workload.tolerates(t))
        {
            Some(taint) => Status::unschedulable(format!("node(s) had untolerated taint {taint}")),
            None => Status::Success,
        }
    }
}
