//! Label selectors and node selector terms.
//!
//! These follow Kubernetes matching rules: node selector terms are an AND of
//! requirements and an empty term matches nothing, while an empty label
//! selector matches everything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Labels attached to a node or workload.
pub type Labels = BTreeMap<String, String>;

/// Operator of a single selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// The label value is one of the listed values.
    In,
    /// The label is absent or its value is not one of the listed values.
    NotIn,
    /// The label is present.
    Exists,
    /// The label is absent.
    DoesNotExist,
    /// The label value, as an integer, is greater than the single listed value.
    Gt,
    /// The label value, as an integer, is less than the single listed value.
    Lt,
}

impl SelectorOperator {
    /// Parse a Kubernetes operator string.
    #[must_use]
    pub fn from_k8s(operator: &str) -> Option<Self> {
        match operator {
            "In" => Some(Self::In),
            "NotIn" => Some(Self::NotIn),
            "Exists" => Some(Self::Exists),
            "DoesNotExist" => Some(Self::DoesNotExist),
            "Gt" => Some(Self::Gt),
            "Lt" => Some(Self::Lt),
            _ => None,
        }
    }
}

impl fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single `key <operator> values` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// Comparison operator.
    pub operator: SelectorOperator,
    /// Operand values; their meaning depends on the operator.
    #[serde(default)]
    pub values: Vec<String>,
}

impl Requirement {
    /// Create a requirement.
    pub fn new(
        key: impl Into<String>,
        operator: SelectorOperator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `key In (values)`.
    pub fn is_in(key: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(key, SelectorOperator::In, values)
    }

    /// `key` exists.
    pub fn exists(key: impl Into<String>) -> Self {
        Self::new(key, SelectorOperator::Exists, Vec::<String>::new())
    }

    /// Check that the requirement is well formed.
    ///
    /// `Gt` and `Lt` are only meaningful for node labels, so they are
    /// rejected unless `allow_numeric` is set.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem.
    pub fn validate(&self, allow_numeric: bool) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("requirement key must not be empty".to_string());
        }
        match self.operator {
            SelectorOperator::In | SelectorOperator::NotIn => {
                if self.values.is_empty() {
                    return Err(format!(
                        "{}: values must be non-empty for operator {}",
                        self.key, self.operator
                    ));
                }
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist => {
                if !self.values.is_empty() {
                    return Err(format!(
                        "{}: values must be empty for operator {}",
                        self.key, self.operator
                    ));
                }
            }
            SelectorOperator::Gt | SelectorOperator::Lt => {
                if !allow_numeric {
                    return Err(format!(
                        "{}: operator {} is not allowed in a label selector",
                        self.key, self.operator
                    ));
                }
                if self.values.len() != 1 || self.values[0].parse::<i64>().is_err() {
                    return Err(format!(
                        "{}: operator {} requires a single integer value",
                        self.key, self.operator
                    ));
                }
            }
        }
        Ok(())
    }

    /// Evaluate the requirement against a label set.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
            SelectorOperator::Gt | SelectorOperator::Lt => {
                let (Some(value), Some(bound)) = (value, self.values.first()) else {
                    return false;
                };
                let (Ok(value), Ok(bound)) = (value.parse::<i64>(), bound.parse::<i64>()) else {
                    return false;
                };
                if self.operator == SelectorOperator::Gt {
                    value > bound
                } else {
                    value < bound
                }
            }
        }
    }
}

/// One required node-affinity term: an AND of requirements over node labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    /// Requirements that must all hold.
    #[serde(default)]
    pub match_expressions: Vec<Requirement>,
}

impl NodeSelectorTerm {
    /// Create a term from its requirements.
    #[must_use]
    pub fn new(match_expressions: Vec<Requirement>) -> Self {
        Self { match_expressions }
    }

    /// Validate every requirement.
    ///
    /// # Errors
    ///
    /// Returns the first malformed requirement's description.
    pub fn validate(&self) -> Result<(), String> {
        self.match_expressions
            .iter()
            .try_for_each(|r| r.validate(true))
    }

    /// A term with no requirements matches no node.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        !self.match_expressions.is_empty()
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

/// A workload label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Exact label matches.
    #[serde(default)]
    pub match_labels: Labels,
    /// Set-based requirements.
    #[serde(default)]
    pub match_expressions: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every label set.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector requiring a single `key=value` label.
    pub fn with_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = Labels::new();
        match_labels.insert(key.into(), value.into());
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }

    /// Add a set-based requirement.
    #[must_use]
    pub fn and(mut self, requirement: Requirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    /// Validate the set-based requirements.
    ///
    /// # Errors
    ///
    /// Returns the first malformed requirement's description.
    pub fn validate(&self) -> Result<(), String> {
        if self.match_labels.keys().any(String::is_empty) {
            return Err("matchLabels key must not be empty".to_string());
        }
        self.match_expressions
            .iter()
            .try_for_each(|r| r.validate(false))
    }

    /// Evaluate the selector; an empty selector matches everything.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}
