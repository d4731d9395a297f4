//! Live topology index for inter-workload affinity.
//!
//! This module provides a node-name-keyed index of running workloads. It is
//! populated once per simulation, either from the same point-in-time pod
//! listing used for resource accounting or from a watch stream, and then
//! treated as read-only. Readiness is signalled through a `tokio` watch
//! channel so callers can wait for the initial population with a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::model::Workload;
use crate::snapshot::Snapshot;
use crate::{Result, SchedulerError};

/// Index of running workloads keyed by node name.
#[derive(Debug)]
pub struct TopologyIndex {
    by_node: RwLock<HashMap<String, Vec<Arc<Workload>>>>,
    ready: watch::Sender<bool>,
}

impl Default for TopologyIndex {
    fn default() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            by_node: RwLock::new(HashMap::new()),
            ready,
        }
    }
}

impl TopologyIndex {
    /// Create a new empty index that is not ready yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ready index from the running workloads of a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let index = Self::new();
        for (node, workload) in snapshot.running() {
            index.insert_shared(node, Arc::clone(workload));
        }
        index.mark_ready();
        index
    }

    /// Add a running workload to a node.
    pub fn insert(&self, node: impl Into<String>, workload: Workload) {
        self.insert_shared(node, Arc::new(workload));
    }

    fn insert_shared(&self, node: impl Into<String>, workload: Arc<Workload>) {
        self.by_node
            .write()
            .entry(node.into())
            .or_default()
            .push(workload);
    }

    /// Drop every entry, e.g. when a watch stream restarts its initial list.
    pub fn clear(&self) {
        self.by_node.write().clear();
    }

    /// Signal that the initial population is complete.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Whether the initial population is complete.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the index is ready.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait until the index is ready, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Timeout`] if the index is not ready in time.
    pub async fn wait_ready_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait_ready())
            .await
            .map_err(|_| {
                SchedulerError::Timeout(format!(
                    "topology index not ready after {}s",
                    timeout.as_secs_f64()
                ))
            })
    }

    /// Running workloads on a node.
    #[must_use]
    pub fn workloads_on(&self, node: &str) -> Vec<Arc<Workload>> {
        self.by_node.read().get(node).cloned().unwrap_or_default()
    }

    /// Whether any running workload declares a required anti-affinity term.
    #[must_use]
    pub fn has_anti_affinity(&self) -> bool {
        self.by_node
            .read()
            .values()
            .flatten()
            .any(|w| w.anti_affinity_terms().next().is_some())
    }

    /// Names of nodes with at least one running workload.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.by_node.read().keys().cloned().collect()
    }

    /// Number of indexed workloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_node.read().values().map(Vec::len).sum()
    }

    /// Check if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
