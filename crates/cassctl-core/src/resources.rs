//! Resource names and resource lists.
//!
//! A [`ResourceList`] maps resource names to canonical integer amounts:
//! CPU in millicores, every other resource in its base unit (bytes for
//! memory and storage, plain counts for pods and extended resources).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Quantity, Result};

/// Longest resource name accepted (a DNS subdomain prefix plus a name).
const MAX_RESOURCE_NAME_LEN: usize = 316;

/// The name of a schedulable resource, such as `cpu` or `nvidia.com/gpu`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// CPU, measured in millicores.
    pub const CPU: &'static str = "cpu";
    /// Memory, measured in bytes.
    pub const MEMORY: &'static str = "memory";
    /// Maximum number of pods on a node.
    pub const PODS: &'static str = "pods";
    /// Local ephemeral storage, measured in bytes.
    pub const EPHEMERAL_STORAGE: &'static str = "ephemeral-storage";

    /// Create a resource name, validating its characters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidResourceName`] for empty or overly long
    /// names, or names containing characters outside `[A-Za-z0-9._/-]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_RESOURCE_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
        if valid {
            Ok(Self(name))
        } else {
            Err(CoreError::InvalidResourceName(name))
        }
    }

    /// The `cpu` resource.
    #[must_use]
    pub fn cpu() -> Self {
        Self(Self::CPU.to_string())
    }

    /// The `memory` resource.
    #[must_use]
    pub fn memory() -> Self {
        Self(Self::MEMORY.to_string())
    }

    /// The `pods` resource.
    #[must_use]
    pub fn pods() -> Self {
        Self(Self::PODS.to_string())
    }

    /// The `ephemeral-storage` resource.
    #[must_use]
    pub fn ephemeral_storage() -> Self {
        Self(Self::EPHEMERAL_STORAGE.to_string())
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether amounts of this resource are kept in millis.
    #[must_use]
    pub fn is_cpu(&self) -> bool {
        self.0 == Self::CPU
    }

    /// Convert a quantity into this resource's canonical unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the quantity overflows the canonical unit.
    pub fn canonical_amount(&self, quantity: &Quantity) -> Result<i64> {
        if self.is_cpu() {
            quantity.milli_value()
        } else {
            quantity.value()
        }
    }

    /// Render a canonical amount of this resource for humans.
    #[must_use]
    pub fn format_amount(&self, amount: i64) -> String {
        const MI: i64 = 1024 * 1024;
        if self.is_cpu() {
            format!("{amount}m")
        } else if self.0 == Self::MEMORY && amount != 0 && amount % MI == 0 {
            format!("{}Mi", amount / MI)
        } else {
            amount.to_string()
        }
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({})", self.0)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

/// A set of resource amounts in canonical units.
///
/// Missing entries read as zero. Arithmetic saturates instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<ResourceName, i64>);

impl ResourceList {
    /// Create an empty resource list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the common CPU + memory pair.
    #[must_use]
    pub fn cpu_memory(cpu_millis: i64, memory_bytes: i64) -> Self {
        let mut list = Self::new();
        list.set(ResourceName::cpu(), cpu_millis);
        list.set(ResourceName::memory(), memory_bytes);
        list
    }

    /// Get the amount of a resource, or zero if absent.
    #[must_use]
    pub fn get(&self, name: &ResourceName) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Get the amount of a resource if it is present.
    #[must_use]
    pub fn get_opt(&self, name: &ResourceName) -> Option<i64> {
        self.0.get(name).copied()
    }

    /// Check whether an entry exists for a resource.
    #[must_use]
    pub fn contains(&self, name: &ResourceName) -> bool {
        self.0.contains_key(name)
    }

    /// Set the amount of a resource.
    pub fn set(&mut self, name: ResourceName, amount: i64) {
        self.0.insert(name, amount);
    }

    /// Set a resource from a parsed quantity in its canonical unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the quantity overflows the canonical unit.
    pub fn insert_quantity(&mut self, name: ResourceName, quantity: &Quantity) -> Result<()> {
        let amount = name.canonical_amount(quantity)?;
        self.set(name, amount);
        Ok(())
    }

    /// Add every entry of `other` into this list.
    pub fn add(&mut self, other: &ResourceList) {
        for (name, amount) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*amount);
        }
    }

    /// Raise each entry to at least the matching entry of `other`.
    pub fn max_with(&mut self, other: &ResourceList) {
        for (name, amount) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(*amount);
            *entry = (*entry).max(*amount);
        }
    }

    /// Iterate over the entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, i64)> {
        self.0.iter().map(|(name, amount)| (name, *amount))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ResourceName, i64)> for ResourceList {
    fn from_iter<I: IntoIterator<Item = (ResourceName, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, amount) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={}", name.format_amount(amount))?;
        }
        Ok(())
    }
}
