//! Workloads, taints and tolerations as seen by the simulator.

use cassctl_core::ResourceList;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::selector::{LabelSelector, Labels, NodeSelectorTerm};

/// Taint key Kubernetes uses to express a cordoned node.
pub const UNSCHEDULABLE_TAINT_KEY: &str = "node.kubernetes.io/unschedulable";

/// Label carried by every proposed workload of a uniform batch.
pub const PROPOSED_LABEL: &str = "cassctl.io/proposed";

/// Effect of a node taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    /// New workloads are not admitted unless they tolerate the taint.
    NoSchedule,
    /// The scheduler avoids the node but may still use it.
    PreferNoSchedule,
    /// New workloads are not admitted and running ones are evicted.
    NoExecute,
}

impl TaintEffect {
    /// Parse a Kubernetes taint effect string.
    #[must_use]
    pub fn from_k8s(effect: &str) -> Option<Self> {
        match effect {
            "NoSchedule" => Some(Self::NoSchedule),
            "PreferNoSchedule" => Some(Self::PreferNoSchedule),
            "NoExecute" => Some(Self::NoExecute),
            _ => None,
        }
    }

    /// Whether the effect prevents admission.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::NoSchedule | Self::NoExecute)
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A node taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    /// Taint key.
    pub key: String,
    /// Taint value, possibly empty.
    #[serde(default)]
    pub value: String,
    /// Taint effect.
    pub effect: TaintEffect,
}

impl Taint {
    /// Create a taint.
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}:{}", self.key, self.effect)
        } else {
            write!(f, "{}={}:{}", self.key, self.value, self.effect)
        }
    }
}

/// Operator of a toleration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TolerationOperator {
    /// Tolerates the key regardless of the value.
    Exists,
    /// Tolerates only an exact key and value match.
    #[default]
    Equal,
}

/// A workload toleration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    /// Taint key; empty together with `Exists` tolerates every taint.
    #[serde(default)]
    pub key: String,
    /// Matching operator.
    #[serde(default)]
    pub operator: TolerationOperator,
    /// Value for `Equal`; must be empty for `Exists`.
    #[serde(default)]
    pub value: String,
    /// Effect to match; `None` matches every effect.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Toleration for `key=value` with operator `Equal`.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Equal,
            value: value.into(),
            effect: None,
        }
    }

    /// Toleration for any value of `key`.
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: None,
        }
    }

    /// Restrict the toleration to one effect.
    #[must_use]
    pub fn with_effect(mut self, effect: TaintEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Check that the toleration is well formed.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem.
    pub fn validate(&self) -> Result<(), String> {
        match self.operator {
            TolerationOperator::Exists if !self.value.is_empty() => Err(format!(
                "toleration {:?}: value must be empty when operator is Exists",
                self.key
            )),
            TolerationOperator::Equal if self.key.is_empty() => {
                Err("toleration operator must be Exists when key is empty".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Whether this toleration tolerates `taint`.
    #[must_use]
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if self.effect.is_some_and(|effect| effect != taint.effect) {
            return false;
        }
        if self.key.is_empty() {
            return self.operator == TolerationOperator::Exists;
        }
        if self.key != taint.key {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// Whether the affinity term attracts or repels matching workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityKind {
    /// A matching workload must run in the same topology domain.
    Required,
    /// No matching workload may run in the same topology domain.
    Forbidden,
}

/// An inter-workload affinity or anti-affinity term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadAffinityTerm {
    /// Selects the workloads the term refers to.
    pub selector: LabelSelector,
    /// Node label grouping nodes into topology domains.
    pub topology_key: String,
    /// Affinity or anti-affinity.
    pub kind: AffinityKind,
}

impl WorkloadAffinityTerm {
    /// A required affinity term.
    pub fn required(selector: LabelSelector, topology_key: impl Into<String>) -> Self {
        Self {
            selector,
            topology_key: topology_key.into(),
            kind: AffinityKind::Required,
        }
    }

    /// A forbidden (anti-affinity) term.
    pub fn forbidden(selector: LabelSelector, topology_key: impl Into<String>) -> Self {
        Self {
            selector,
            topology_key: topology_key.into(),
            kind: AffinityKind::Forbidden,
        }
    }

    /// Check that the term is well formed.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.topology_key.is_empty() {
            return Err("topology key must not be empty".to_string());
        }
        self.selector.validate()
    }
}

/// A unit of compute: either a proposed workload or a running pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Display name.
    pub name: String,
    /// Identity labels, the subject of other workloads' affinity terms.
    #[serde(default)]
    pub labels: Labels,
    /// Resource requests in canonical units.
    #[serde(default)]
    pub requests: ResourceList,
    /// Tolerations.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Flat node selector; every entry must match a node label.
    #[serde(default)]
    pub node_selector: Labels,
    /// Required node-affinity terms, ORed. `None` means no requirement.
    #[serde(default)]
    pub node_affinity: Option<Vec<NodeSelectorTerm>>,
    /// Required inter-workload affinity and anti-affinity terms.
    #[serde(default)]
    pub affinity_terms: Vec<WorkloadAffinityTerm>,
}

impl Workload {
    /// Create a workload with resource requests and nothing else.
    pub fn new(name: impl Into<String>, requests: ResourceList) -> Self {
        Self {
            name: name.into(),
            requests,
            ..Default::default()
        }
    }

    /// Add an identity label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a toleration.
    #[must_use]
    pub fn with_toleration(mut self, toleration: Toleration) -> Self {
        self.tolerations.push(toleration);
        self
    }

    /// Add a node selector entry.
    #[must_use]
    pub fn with_node_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_selector.insert(key.into(), value.into());
        self
    }

    /// Set the required node-affinity terms.
    #[must_use]
    pub fn with_node_affinity(mut self, terms: Vec<NodeSelectorTerm>) -> Self {
        self.node_affinity = Some(terms);
        self
    }

    /// Add an inter-workload affinity term.
    #[must_use]
    pub fn with_affinity_term(mut self, term: WorkloadAffinityTerm) -> Self {
        self.affinity_terms.push(term);
        self
    }

    /// Whether any tolerations tolerate `taint`.
    #[must_use]
    pub fn tolerates(&self, taint: &Taint) -> bool {
        self.tolerations.iter().any(|t| t.tolerates(taint))
    }

    /// Iterate over the forbidden (anti-affinity) terms.
    pub fn anti_affinity_terms(&self) -> impl Iterator<Item = &WorkloadAffinityTerm> {
        self.affinity_terms
            .iter()
            .filter(|t| t.kind == AffinityKind::Forbidden)
    }
}

/// One resource profile applied to every workload of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// CPU request in millicores.
    pub cpu_millis: i64,
    /// Memory request in bytes.
    pub memory_bytes: i64,
    /// Tolerations applied to each workload.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Node selector applied to each workload.
    #[serde(default)]
    pub node_selector: Labels,
    /// When set, the workloads repel each other across this topology key.
    #[serde(default)]
    pub spread_by: Option<String>,
}

impl WorkloadProfile {
    /// Profile with only CPU and memory requests.
    #[must_use]
    pub fn new(cpu_millis: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            ..Default::default()
        }
    }

    /// Expand the profile into `count` identical workloads.
    #[must_use]
    pub fn workloads(&self, count: usize) -> Vec<Workload> {
        (0..count)
            .map(|i| {
                let mut workload = Workload::new(
                    format!("proposed-{i}"),
                    ResourceList::cpu_memory(self.cpu_millis, self.memory_bytes),
                )
                .with_label(PROPOSED_LABEL, "true");
                workload.tolerations.clone_from(&self.tolerations);
                workload.node_selector.clone_from(&self.node_selector);
                if let Some(key) = &self.spread_by {
                    workload = workload.with_affinity_term(WorkloadAffinityTerm::forbidden(
                        LabelSelector::with_label(PROPOSED_LABEL, "true"),
                        key.clone(),
                    ));
                }
                workload
            })
            .collect()
    }
}
