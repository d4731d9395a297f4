//! Required inter-workload affinity and anti-affinity.
//!
//! Terms are evaluated per topology domain: the set of nodes sharing the
//! candidate node's value for the term's topology key. The workloads in a
//! domain are the running workloads from the topology index plus the
//! proposals already placed earlier in the run.

use std::sync::Arc;

use crate::model::{AffinityKind, Workload, WorkloadAffinityTerm};
use crate::snapshot::NodeRecord;

use super::{ClusterView, CycleState, Predicate, Status};

const AFFINITY_REASON: &str = "node(s) didn't match pod affinity rules";
const ANTI_AFFINITY_REASON: &str = "node(s) didn't match pod anti-affinity rules";
const EXISTING_ANTI_AFFINITY_REASON: &str =
    "node(s) didn't satisfy existing pods anti-affinity rules";

/// Enforces required affinity and anti-affinity between workloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterWorkloadAffinity;

impl Predicate for InterWorkloadAffinity {
    fn name(&self) -> &'static str {
        "InterWorkloadAffinity"
    }

    fn pre_filter(
        &self,
        view: &ClusterView<'_>,
        workload: &Workload,
        state: &mut CycleState,
    ) -> Status {
        if let Err(e) = workload
            .affinity_terms
            .iter()
            .try_for_each(WorkloadAffinityTerm::validate)
        {
            return Status::error(e);
        }

        let placed_anti_affinity = view
            .nodes()
            .iter()
            .flat_map(NodeRecord::placed)
            .any(|w| w.anti_affinity_terms().next().is_some());
        if workload.affinity_terms.is_empty()
            && !placed_anti_affinity
            && !view.topology().has_anti_affinity()
        {
            return Status::Skip;
        }

        state.affinity_terms.clone_from(&workload.affinity_terms);
        Status::Success
    }

    fn filter(
        &self,
        view: &ClusterView<'_>,
        state: &CycleState,
        workload: &Workload,
        node: &NodeRecord,
    ) -> Status {
        for term in &state.affinity_terms {
            let status = match term.kind {
                AffinityKind::Required => check_required(view, workload, term, node),
                AffinityKind::Forbidden => check_forbidden(view, term, node),
            };
            if !status.is_success() {
                return status;
            }
        }
        check_existing_anti_affinity(view, workload, node)
    }
}

/// Workloads running on or placed onto nodes whose `key` label is `value`.
fn domain_workloads(view: &ClusterView<'_>, key: &str, value: &str) -> Vec<Arc<Workload>> {
    view.nodes_in_domain(key, value)
        .flat_map(|n| view.workloads_on(n))
        .collect()
}

fn check_required(
    view: &ClusterView<'_>,
    workload: &Workload,
    term: &WorkloadAffinityTerm,
    node: &NodeRecord,
) -> Status {
    let Some(value) = node.labels.get(&term.topology_key) else {
        return Status::unschedulable(AFFINITY_REASON);
    };

    let in_domain = domain_workloads(view, &term.topology_key, value)
        .iter()
        .any(|w| term.selector.matches(&w.labels));
    if in_domain {
        return Status::Success;
    }

    // First workload of a group: nothing matches anywhere yet, but the
    // workload would match its own term.
    let anywhere = view
        .nodes()
        .iter()
        .flat_map(|n| view.workloads_on(n))
        .any(|w| term.selector.matches(&w.labels));
    if !anywhere && term.selector.matches(&workload.labels) {
        Status::Success
    } else {
        Status::unschedulable(AFFINITY_REASON)
    }
}

fn check_forbidden(view: &ClusterView<'_>, term: &WorkloadAffinityTerm, node: &NodeRecord) -> Status {
    let Some(value) = node.labels.get(&term.topology_key) else {
        return Status::Success;
    };

    let violated = domain_workloads(view, &term.topology_key, value)
        .iter()
        .any(|w| term.selector.matches(&w.labels));
    if violated {
        Status::unschedulable(ANTI_AFFINITY_REASON)
    } else {
        Status::Success
    }
}

fn check_existing_anti_affinity(
    view: &ClusterView<'_>,
    workload: &Workload,
    node: &NodeRecord,
) -> Status {
    for host in view.nodes() {
        for existing in view.workloads_on(host) {
            let violated = existing.anti_affinity_terms().any(|term| {
                let candidate = node.labels.get(&term.topology_key);
                candidate.is_some()
                    && candidate == host.labels.get(&term.topology_key)
                    && term.selector.matches(&workload.labels)
            });
            if violated {
                return Status::unschedulable(EXISTING_ANTI_AFFINITY_REASON);
            }
        }
    }
    Status::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{LabelSelector, Requirement, SelectorOperator};
    use crate::topology::TopologyIndex;
    use cassctl_core::ResourceList;

    const ZONE: &str = "topology.kubernetes.io/zone";
    const HOST: &str = "kubernetes.io/hostname";

    fn node(name: &str, zone: &str) -> NodeRecord {
        NodeRecord::new(name, ResourceList::cpu_memory(4000, 4096))
            .with_label(ZONE, zone)
            .with_label(HOST, name)
    }

    fn workload(app: &str) -> Workload {
        Workload::new(app, ResourceList::cpu_memory(100, 100)).with_label("app", app)
    }

    /// Run both stages for every node and collect the per-node verdicts.
    fn evaluate(
        nodes: &[NodeRecord],
        topology: &TopologyIndex,
        workload: &Workload,
    ) -> (Status, Vec<Status>) {
        let view = ClusterView::new(nodes, topology);
        let mut state = CycleState::default();
        let pre = InterWorkloadAffinity.pre_filter(&view, workload, &mut state);
        let verdicts = nodes
            .iter()
            .map(|n| InterWorkloadAffinity.filter(&view, &state, workload, n))
            .collect();
        (pre, verdicts)
    }

    #[test]
    fn skips_without_terms_or_existing_anti_affinity() {
        let nodes = vec![node("a", "z1")];
        let topology = TopologyIndex::new();
        topology.insert("a", workload("web"));

        let (pre, _) = evaluate(&nodes, &topology, &workload("db"));
        assert_eq!(pre, Status::Skip);
    }

    #[test]
    fn existing_anti_affinity_disables_skip() {
        let nodes = vec![node("a", "z1")];
        let topology = TopologyIndex::new();
        topology.insert(
            "a",
            workload("web").with_affinity_term(WorkloadAffinityTerm::forbidden(
                LabelSelector::with_label("app", "db"),
                HOST,
            )),
        );

        let (pre, verdicts) = evaluate(&nodes, &topology, &workload("db"));
        assert_eq!(pre, Status::Success);
        assert_eq!(
            verdicts[0],
            Status::unschedulable(EXISTING_ANTI_AFFINITY_REASON)
        );
    }

    #[test]
    fn malformed_term_fails_pre_filter() {
        let nodes = vec![node("a", "z1")];
        let topology = TopologyIndex::new();
        let bad = workload("db").with_affinity_term(WorkloadAffinityTerm::forbidden(
            LabelSelector::everything(),
            "",
        ));
        assert!(matches!(evaluate(&nodes, &topology, &bad).0, Status::Error(_)));

        let numeric = workload("db").with_affinity_term(WorkloadAffinityTerm::required(
            LabelSelector::everything().and(Requirement::new("rank", SelectorOperator::Gt, ["1"])),
            ZONE,
        ));
        assert!(matches!(
            evaluate(&nodes, &topology, &numeric).0,
            Status::Error(_)
        ));
    }

    #[test]
    fn anti_affinity_is_evaluated_per_domain() {
        let nodes = vec![node("a", "z1"), node("b", "z1"), node("c", "z2")];
        let topology = TopologyIndex::new();
        topology.insert("a", workload("db"));

        let spread = workload("db").with_affinity_term(WorkloadAffinityTerm::forbidden(
            LabelSelector::with_label("app", "db"),
            ZONE,
        ));
        let (_, verdicts) = evaluate(&nodes, &topology, &spread);

        assert!(matches!(verdicts[0], Status::Unschedulable(_)));
        assert!(matches!(verdicts[1], Status::Unschedulable(_)));
        assert_eq!(verdicts[2], Status::Success);
    }

    #[test]
    fn anti_affinity_sees_placed_workloads() {
        let mut nodes = vec![node("a", "z1"), node("b", "z2")];
        let term =
            WorkloadAffinityTerm::forbidden(LabelSelector::with_label("app", "db"), ZONE);
        nodes[0].place(Arc::new(workload("db").with_affinity_term(term.clone())));
        let topology = TopologyIndex::new();

        let (_, verdicts) = evaluate(&nodes, &topology, &workload("db").with_affinity_term(term));
        assert_eq!(verdicts[0], Status::unschedulable(ANTI_AFFINITY_REASON));
        assert_eq!(verdicts[1], Status::Success);
    }

    #[test]
    fn node_without_key_passes_anti_affinity() {
        let nodes = vec![NodeRecord::new("bare", ResourceList::cpu_memory(1000, 1000))];
        let topology = TopologyIndex::new();
        topology.insert("bare", workload("db"));

        let spread = workload("db").with_affinity_term(WorkloadAffinityTerm::forbidden(
            LabelSelector::with_label("app", "db"),
            ZONE,
        ));
        assert_eq!(evaluate(&nodes, &topology, &spread).1[0], Status::Success);
    }

    #[test]
    fn required_affinity_follows_matching_workloads() {
        let nodes = vec![node("a", "z1"), node("b", "z2")];
        let topology = TopologyIndex::new();
        topology.insert("b", workload("cache"));

        let near_cache = workload("db").with_affinity_term(WorkloadAffinityTerm::required(
            LabelSelector::with_label("app", "cache"),
            ZONE,
        ));
        let (_, verdicts) = evaluate(&nodes, &topology, &near_cache);

        assert_eq!(verdicts[0], Status::unschedulable(AFFINITY_REASON));
        assert_eq!(verdicts[1], Status::Success);
    }

    #[test]
    fn first_workload_of_a_group_may_start_anywhere() {
        let nodes = vec![node("a", "z1"), node("b", "z2")];
        let topology = TopologyIndex::new();

        let grouped = workload("db").with_affinity_term(WorkloadAffinityTerm::required(
            LabelSelector::with_label("app", "db"),
            ZONE,
        ));
        let (_, verdicts) = evaluate(&nodes, &topology, &grouped);
        assert!(verdicts.iter().all(Status::is_success));

        let stranger = workload("web").with_affinity_term(WorkloadAffinityTerm::required(
            LabelSelector::with_label("app", "db"),
            ZONE,
        ));
        let (_, verdicts) = evaluate(&nodes, &topology, &stranger);
        assert!(verdicts.iter().all(|s| !s.is_success()));
    }

    #[test]
    fn node_without_key_fails_required_affinity() {
        let nodes = vec![NodeRecord::new("bare", ResourceList::cpu_memory(1000, 1000))];
        let topology = TopologyIndex::new();

        let grouped = workload("db").with_affinity_term(WorkloadAffinityTerm::required(
            LabelSelector::with_label("app", "db"),
            ZONE,
        ));
        assert_eq!(
            evaluate(&nodes, &topology, &grouped).1[0],
            Status::unschedulable(AFFINITY_REASON)
        );
    }
}
