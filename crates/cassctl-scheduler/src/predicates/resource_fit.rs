//! Binary resource fit check.

use cassctl_core::ResourceName;

use crate::model::Workload;
use crate::snapshot::NodeRecord;

use super::{ClusterView, CycleState, Predicate, Status};

/// Checks that the node's remaining capacity covers the workload's requests.
///
/// Fit is inclusive: a request equal to the remaining amount fits. The
/// `pods` resource is checked by count, one slot per workload, against the
/// node's allocatable pod limit when it declares one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceFit;

impl Predicate for ResourceFit {
    fn name(&self) -> &'static str {
        "ResourceFit"
    }

    fn filter(
        &self,
        _view: &ClusterView<'_>,
        _state: &CycleState,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Status {
        let pods = ResourceName::pods();
        if let Some(max_pods) = node.allocatable.get_opt(&pods) {
            let wanted = i64::try_from(node.pod_count()).unwrap_or(i64::MAX).saturating_add(1);
            if wanted > max_pods {
                return Status::unschedulable("Too many pods");
            }
        }

        for (resource, requested) in workload.requests.iter() {
            if requested == 0 || *resource == pods {
                continue;
            }
            if requested > node.remaining(resource) {
                return Status::unschedulable(format!("Insufficient {resource}"));
            }
        }

        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyIndex;
    use cassctl_core::ResourceList;
    use std::sync::Arc;

    fn check(workload: &Workload, node: &NodeRecord) -> Status {
        let topology = TopologyIndex::new();
        let nodes = [node.clone()];
        let view = ClusterView::new(&nodes, &topology);
        ResourceFit.filter(&view, &CycleState::default(), workload, node)
    }

    fn node(cpu: i64, memory: i64) -> NodeRecord {
        NodeRecord::new("node1", ResourceList::cpu_memory(cpu, memory))
    }

    #[test]
    fn fits_with_room_to_spare() {
        let workload = Workload::new("w", ResourceList::cpu_memory(100, 100));
        assert_eq!(check(&workload, &node(1000, 1000)), Status::Success);
    }

    #[test]
    fn exact_fit_is_allowed() {
        let workload = Workload::new("w", ResourceList::cpu_memory(1000, 1000));
        assert_eq!(check(&workload, &node(1000, 1000)), Status::Success);
    }

    #[test]
    fn one_unit_over_is_rejected() {
        let workload = Workload::new("w", ResourceList::cpu_memory(1000, 1001));
        assert_eq!(
            check(&workload, &node(1000, 1000)),
            Status::unschedulable("Insufficient memory")
        );
    }

    #[test]
    fn accounts_for_allocated_resources() {
        let mut node = node(1000, 1000);
        node.place(Arc::new(Workload::new("other", ResourceList::cpu_memory(600, 0))));

        let workload = Workload::new("w", ResourceList::cpu_memory(500, 0));
        assert_eq!(check(&workload, &node), Status::unschedulable("Insufficient cpu"));

        let workload = Workload::new("w", ResourceList::cpu_memory(400, 0));
        assert_eq!(check(&workload, &node), Status::Success);
    }

    #[test]
    fn missing_allocatable_counts_as_zero() {
        let gpu = ResourceName::new("nvidia.com/gpu").unwrap();
        let mut requests = ResourceList::cpu_memory(1, 1);
        requests.set(gpu.clone(), 1);
        let workload = Workload::new("w", requests);
        assert_eq!(
            check(&workload, &node(1000, 1000)),
            Status::unschedulable("Insufficient nvidia.com/gpu")
        );

        let mut requests = ResourceList::cpu_memory(1, 1);
        requests.set(gpu, 0);
        assert_eq!(
            check(&Workload::new("w", requests), &node(1000, 1000)),
            Status::Success
        );
    }

    #[test]
    fn pod_limit_is_enforced() {
        let mut allocatable = ResourceList::cpu_memory(1000, 1000);
        allocatable.set(ResourceName::pods(), 1);
        let full = NodeRecord::new("node1", allocatable.clone()).with_label("x", "y");
        let workload = Workload::new("w", ResourceList::cpu_memory(1, 1));
        assert_eq!(check(&workload, &full), Status::Success);

        allocatable.set(ResourceName::pods(), 0);
        let none = NodeRecord::new("node1", allocatable);
        assert_eq!(check(&workload, &none), Status::unschedulable("Too many pods"));
    }
}
