//! Node selector and required node affinity.

use crate::model::Workload;
use crate::selector::NodeSelectorTerm;
use crate::snapshot::NodeRecord;

use super::{ClusterView, CycleState, Predicate, Status};

/// Checks the workload's node selector and required node-affinity terms.
///
/// Every node-selector entry must equal the node's label. When required
/// terms are declared, at least one of them must match; an empty term list
/// matches no node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeAffinity;

const REASON: &str = "node(s) didn't match Pod's node affinity/selector";

impl Predicate for NodeAffinity {
    fn name(&self) -> &'static str {
        "NodeAffinity"
    }

    fn validate(&self, workload: &Workload) -> Status {
        match workload
            .node_affinity
            .iter()
            .flatten()
            .try_for_each(NodeSelectorTerm::validate)
        {
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
        let selector_matches = workload
            .node_selector
            .iter()
            .all(|(k, v)| node.labels.get(k) == Some(v));
        if !selector_matches {
            return Status::unschedulable(REASON);
        }

        let Some(terms) = &workload.node_affinity else {
            return Status::Success;
        };

        if terms.iter().any(|t| t.matches(&node.labels)) {
            Status::Success
        } else {
            Status::unschedulable(REASON)
        }
    }
}
