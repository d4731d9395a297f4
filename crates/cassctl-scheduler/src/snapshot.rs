//! Point-in-time cluster inventory.
//!
//! A [`Snapshot`] holds one [`NodeRecord`] per listed node, in listing order,
//! with the resources already claimed by the pods bound to it. It is built
//! fresh for every simulation and mutated only by the placement engine.

use std::collections::HashMap;
use std::sync::Arc;

use cassctl_core::{ResourceList, ResourceName};
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::debug;

use crate::model::{Taint, TaintEffect, Workload};
use crate::pod::{bound_node, is_terminal, pod_name, resource_list, workload_from_pod};
use crate::selector::Labels;
use crate::{Result, SchedulerError};

/// A node as seen by one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node name.
    pub name: String,
    /// Node labels.
    pub labels: Labels,
    /// Node taints, in declaration order.
    pub taints: Vec<Taint>,
    /// Allocatable capacity.
    pub allocatable: ResourceList,
    /// Sum of the requests of every workload bound to the node.
    pub allocated: ResourceList,
    /// Cordoned by an operator (`spec.unschedulable`).
    pub cordoned: bool,
    running_pods: usize,
    consumed: bool,
    placed: Vec<Arc<Workload>>,
}

impl NodeRecord {
    /// Create an empty, schedulable node.
    pub fn new(name: impl Into<String>, allocatable: ResourceList) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            taints: Vec::new(),
            allocatable,
            allocated: ResourceList::new(),
            cordoned: false,
            running_pods: 0,
            consumed: false,
            placed: Vec::new(),
        }
    }

    /// Convert a Kubernetes node.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Retrieval`] if the node has no name, an
    /// unknown taint effect or an unparseable allocatable quantity.
    pub fn from_node(node: &Node) -> Result<Self> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| SchedulerError::Retrieval("node without a name".to_string()))?;

        let allocatable = match node.status.as_ref().and_then(|s| s.allocatable.as_ref()) {
            Some(map) => resource_list(map)
                .map_err(|e| SchedulerError::Retrieval(format!("node {name}: {e}")))?,
            None => ResourceList::new(),
        };

        let spec = node.spec.as_ref();
        let taints = spec
            .and_then(|s| s.taints.as_ref())
            .into_iter()
            .flatten()
            .map(|t| {
                let effect = TaintEffect::from_k8s(&t.effect).ok_or_else(|| {
                    SchedulerError::Retrieval(format!(
                        "node {name}: unknown taint effect {:?}",
                        t.effect
                    ))
                })?;
                Ok(Taint::new(
                    t.key.clone(),
                    t.value.clone().unwrap_or_default(),
                    effect,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            labels: node.metadata.labels.clone().unwrap_or_default(),
            taints,
            cordoned: spec.and_then(|s| s.unschedulable).unwrap_or(false),
            ..Self::new(name, allocatable)
        })
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a taint.
    #[must_use]
    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    /// Mark the node as cordoned.
    #[must_use]
    pub fn cordon(mut self) -> Self {
        self.cordoned = true;
        self
    }

    /// Whether the placement engine already used this node in the current run.
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Whether the node refuses new workloads, for either reason.
    #[must_use]
    pub const fn is_unschedulable(&self) -> bool {
        self.cordoned || self.consumed
    }

    /// Proposed workloads placed on this node during the current run.
    #[must_use]
    pub fn placed(&self) -> &[Arc<Workload>] {
        &self.placed
    }

    /// Number of pods counted against the node's pod limit.
    #[must_use]
    pub fn pod_count(&self) -> usize {
        self.running_pods + self.placed.len()
    }

    /// Allocatable minus allocated for one resource.
    #[must_use]
    pub fn remaining(&self, resource: &ResourceName) -> i64 {
        self.allocatable
            .get(resource)
            .saturating_sub(self.allocated.get(resource))
    }

    /// Account for a pod that is already running here.
    pub(crate) fn bind_running(&mut self, workload: &Workload) {
        self.allocated.add(&workload.requests);
        self.running_pods += 1;
    }

    /// Record a proposed workload and consume the node.
    pub(crate) fn place(&mut self, workload: Arc<Workload>) {
        self.allocated.add(&workload.requests);
        self.placed.push(workload);
        self.consumed = true;
    }
}

/// In-memory inventory for exactly one simulation run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: Vec<NodeRecord>,
    running: Vec<(String, Arc<Workload>)>,
}

impl Snapshot {
    /// Build a snapshot from listed nodes and pods.
    ///
    /// Every node is kept, cordoned or not. Pods that are unbound, finished,
    /// or bound to a node that is not in the listing are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Retrieval`] if a node or pod cannot be converted.
    pub fn build(nodes: &[Node], pods: &[Pod]) -> Result<Self> {
        let records = nodes
            .iter()
            .map(NodeRecord::from_node)
            .collect::<Result<Vec<_>>>()?;
        let mut snapshot = Self::from_records(records);

        for pod in pods {
            if is_terminal(pod) {
                continue;
            }
            let Some(node) = bound_node(pod) else {
                continue;
            };
            if snapshot.position(node).is_none() {
                debug!(pod = pod_name(pod), node, "Pod bound to an unlisted node, ignoring");
                continue;
            }
            snapshot.bind_running(node, workload_from_pod(pod)?);
        }

        debug!(
            nodes = snapshot.nodes.len(),
            running = snapshot.running.len(),
            "Built cluster snapshot"
        );
        Ok(snapshot)
    }

    /// Create a snapshot from prepared node records with no running pods.
    #[must_use]
    pub fn from_records(nodes: Vec<NodeRecord>) -> Self {
        Self {
            nodes,
            running: Vec::new(),
        }
    }

    /// Add a running workload to a node, returning the snapshot.
    ///
    /// Unknown node names are ignored.
    #[must_use]
    pub fn with_running(mut self, node: &str, workload: Workload) -> Self {
        self.bind_running(node, workload);
        self
    }

    fn bind_running(&mut self, node: &str, workload: Workload) {
        let Some(index) = self.position(node) else {
            return;
        };
        let workload = Arc::new(workload);
        self.nodes[index].bind_running(&workload);
        self.running.push((node.to_string(), workload));
    }

    fn position(&self, node: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == node)
    }

    /// Node records in listing order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [NodeRecord] {
        &mut self.nodes
    }

    /// Look up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Running workloads with the node they are bound to.
    pub fn running(&self) -> impl Iterator<Item = (&str, &Arc<Workload>)> {
        self.running.iter().map(|(node, w)| (node.as_str(), w))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index pods by name of the node they run on.
    #[must_use]
    pub fn running_by_node(&self) -> HashMap<&str, Vec<&Arc<Workload>>> {
        let mut map: HashMap<&str, Vec<&Arc<Workload>>> = HashMap::new();
        for (node, workload) in self.running() {
            map.entry(node).or_default().push(workload);
        }
        map
    }
}
