//! Cluster state retrieval.
//!
//! This module provides the [`ClusterStateProvider`] trait the estimator
//! reads nodes and pods through, and [`KubeClusterState`], which reads them
//! from a Kubernetes API server. Retrieval is read-only; nothing here ever
//! writes to the cluster.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::Client;
use tracing::{debug, info};

use crate::pod::{bound_node, is_terminal, pod_name, workload_from_pod};
use crate::snapshot::Snapshot;
use crate::topology::TopologyIndex;
use crate::types::{SimulationConfig, TopologyMode};
use crate::{Result, SchedulerError};

/// Field selector excluding pods that no longer hold resources.
const ACTIVE_PODS: &str = "status.phase!=Succeeded,status.phase!=Failed";

/// Source of nodes and pods for a simulation.
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// List every node in the cluster, in listing order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails. Callers do not retry.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List the pods that may hold node resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails. Callers do not retry.
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// Build the topology index for a simulation over `snapshot`.
    ///
    /// The default reuses the snapshot's running workloads and is ready
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be populated.
    async fn topology_index(&self, snapshot: &Snapshot) -> Result<TopologyIndex> {
        Ok(TopologyIndex::from_snapshot(snapshot))
    }
}

/// Reads cluster state from the Kubernetes API.
///
/// Nodes and pods are listed cluster-wide. In [`TopologyMode::Live`] the
/// topology index is populated from a pod watch stream that is consumed
/// until its initial listing completes.
pub struct KubeClusterState {
    client: Client,
    config: SimulationConfig,
}

impl KubeClusterState {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created or the
    /// configuration is invalid.
    pub async fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    /// Create a provider with a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client, config: SimulationConfig) -> Self {
        Self { client, config }
    }

    /// Get a reference to the simulation config.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn nodes_api(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods_api(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    /// Populate an index from a pod watch until the initial sync is done.
    async fn watch_topology(&self, snapshot: &Snapshot) -> Result<TopologyIndex> {
        let mut config = WatcherConfig::default().fields(ACTIVE_PODS);
        if let Some(selector) = &self.config.pod_label_selector {
            config = config.labels(selector);
        }

        info!(
            label_selector = self.config.pod_label_selector.as_deref().unwrap_or(""),
            "Starting topology sync"
        );
        sync_topology(watcher(self.pods_api(), config), snapshot).await
    }
}

/// Drain watch events into a fresh index until the initial listing is done.
///
/// `Init` restarts the listing and clears whatever was indexed so far.
/// Events after `InitDone` are never read.
async fn sync_topology<S>(events: S, snapshot: &Snapshot) -> Result<TopologyIndex>
where
    S: Stream<Item = std::result::Result<watcher::Event<Pod>, watcher::Error>>,
{
    let index = TopologyIndex::new();
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        match event.map_err(|e| SchedulerError::TopologySync(e.to_string()))? {
            watcher::Event::Init => {
                index.clear();
            }
            watcher::Event::InitApply(pod) => {
                index_pod(&index, snapshot, &pod)?;
            }
            watcher::Event::InitDone => {
                index.mark_ready();
                info!(workloads = index.len(), "Topology sync complete");
                return Ok(index);
            }
            watcher::Event::Apply(_) | watcher::Event::Delete(_) => {}
        }
    }

    Err(SchedulerError::TopologySync(
        "pod watch ended before the initial sync completed".to_string(),
    ))
}

/// Add one watched pod to the index, skipping pods the snapshot ignores.
fn index_pod(index: &TopologyIndex, snapshot: &Snapshot, pod: &Pod) -> Result<()> {
    if is_terminal(pod) {
        return Ok(());
    }
    let Some(node) = bound_node(pod) else {
        return Ok(());
    };
    if snapshot.node(node).is_none() {
        debug!(pod = pod_name(pod), node, "Watched pod on an unlisted node, ignoring");
        return Ok(());
    }
    index.insert(node, workload_from_pod(pod)?);
    Ok(())
}

#[async_trait]
impl ClusterStateProvider for KubeClusterState {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let list = self.nodes_api().list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items)
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let params = ListParams::default().fields(ACTIVE_PODS);
        let list = self.pods_api().list(&params).await?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    async fn topology_index(&self, snapshot: &Snapshot) -> Result<TopologyIndex> {
        match self.config.topology_mode {
            TopologyMode::Snapshot => Ok(TopologyIndex::from_snapshot(snapshot)),
            TopologyMode::Live => self.watch_topology(snapshot).await,
        }
    }
}

/// In-memory cluster state for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeSpec, NodeStatus, PodSpec, PodStatus, ResourceRequirements, Taint,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A provider serving fixed nodes and pods.
    #[derive(Default)]
    pub struct StaticClusterState {
        nodes: Mutex<Vec<Node>>,
        pods: Mutex<Vec<Pod>>,
        failure: Mutex<Option<String>>,
        delay: Option<Duration>,
        never_ready: bool,
        list_calls: AtomicUsize,
    }

    impl StaticClusterState {
        /// Create a provider serving the given objects.
        #[must_use]
        pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
            Self {
                nodes: Mutex::new(nodes),
                pods: Mutex::new(pods),
                ..Default::default()
            }
        }

        /// Make every listing fail with `message`.
        #[must_use]
        pub fn failing(self, message: impl Into<String>) -> Self {
            *self.failure.lock() = Some(message.into());
            self
        }

        /// Delay every listing by `delay`.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Hand out topology indexes that never become ready.
        #[must_use]
        pub fn with_unready_topology(mut self) -> Self {
            self.never_ready = true;
            self
        }

        /// Replace the served nodes.
        pub fn set_nodes(&self, nodes: Vec<Node>) {
            *self.nodes.lock() = nodes;
        }

        /// Replace the served pods.
        pub fn set_pods(&self, pods: Vec<Pod>) {
            *self.pods.lock() = pods;
        }

        /// Number of node and pod listings served so far.
        #[must_use]
        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        async fn before_list(&self) -> Result<()> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.failure.lock().clone() {
                Some(message) => Err(SchedulerError::Retrieval(message)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ClusterStateProvider for StaticClusterState {
        async fn list_nodes(&self) -> Result<Vec<Node>> {
            self.before_list().await?;
            Ok(self.nodes.lock().clone())
        }

        async fn list_pods(&self) -> Result<Vec<Pod>> {
            self.before_list().await?;
            Ok(self.pods.lock().clone())
        }

        async fn topology_index(&self, snapshot: &Snapshot) -> Result<TopologyIndex> {
            if self.never_ready {
                return Ok(TopologyIndex::new());
            }
            Ok(TopologyIndex::from_snapshot(snapshot))
        }
    }

    fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    }

    /// A schedulable node with the given allocatable CPU and memory.
    #[must_use]
    pub fn node(name: &str, cpu: &str, memory: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec::default()),
            status: Some(NodeStatus {
                allocatable: Some(quantities(cpu, memory)),
                ..Default::default()
            }),
        }
    }

    /// Add a label to a node.
    #[must_use]
    pub fn labeled(mut node: Node, key: &str, value: &str) -> Node {
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        node
    }

    /// Add a taint to a node.
    #[must_use]
    pub fn tainted(mut node: Node, key: &str, value: &str, effect: &str) -> Node {
        node.spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: key.to_string(),
                value: Some(value.to_string()),
                effect: effect.to_string(),
                ..Default::default()
            });
        node
    }

    /// Mark a node as cordoned.
    #[must_use]
    pub fn cordoned(mut node: Node) -> Node {
        node.spec.get_or_insert_with(NodeSpec::default).unschedulable = Some(true);
        node
    }

    /// A running single-container pod bound to `node`.
    #[must_use]
    pub fn pod(name: &str, node: &str, cpu: &str, memory: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(quantities(cpu, memory)),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{self, StaticClusterState};
    use super::*;
    use crate::model::Workload;
    use cassctl_core::ResourceList;
    use k8s_openapi::api::core::v1::PodStatus;

    #[tokio::test]
    async fn static_state_serves_objects() {
        let provider = StaticClusterState::new(
            vec![mock::node("node1", "4", "8Gi")],
            vec![mock::pod("p", "node1", "1", "1Gi")],
        );

        assert_eq!(provider.list_nodes().await.unwrap().len(), 1);
        assert_eq!(provider.list_pods().await.unwrap().len(), 1);
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn static_state_failure() {
        let provider = StaticClusterState::default().failing("connection refused");
        let err = provider.list_nodes().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Retrieval(ref m) if m == "connection refused"));
    }

    #[tokio::test]
    async fn default_topology_comes_from_snapshot() {
        let nodes = vec![mock::node("node1", "4", "8Gi")];
        let pods = vec![mock::pod("p", "node1", "1", "1Gi")];
        let provider = StaticClusterState::new(nodes.clone(), pods.clone());
        let snapshot = Snapshot::build(&nodes, &pods).unwrap();

        let index = provider.topology_index(&snapshot).await.unwrap();
        assert!(index.is_ready());
        assert_eq!(index.workloads_on("node1").len(), 1);
    }

    #[test]
    fn index_pod_skips_ignored_pods() {
        let snapshot = Snapshot::build(&[mock::node("node1", "4", "8Gi")], &[]).unwrap();
        let index = TopologyIndex::new();

        let mut finished = mock::pod("done", "node1", "1", "1Gi");
        finished.status = Some(PodStatus {
            phase: Some("Failed".to_string()),
            ..Default::default()
        });

        index_pod(&index, &snapshot, &mock::pod("a", "node1", "1", "1Gi")).unwrap();
        index_pod(&index, &snapshot, &mock::pod("b", "node9", "1", "1Gi")).unwrap();
        index_pod(&index, &snapshot, &finished).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.node_names(), vec!["node1".to_string()]);
    }

    fn two_nodes() -> Snapshot {
        Snapshot::build(
            &[mock::node("node1", "4", "8Gi"), mock::node("node2", "4", "8Gi")],
            &[],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sync_restarts_on_init_and_finishes_on_init_done() {
        let snapshot = two_nodes();
        let events = futures::stream::iter(vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(mock::pod("old", "node1", "1", "1Gi"))),
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(mock::pod("new", "node2", "1", "1Gi"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(mock::pod("late", "node1", "1", "1Gi"))),
        ]);

        let index = sync_topology(events, &snapshot).await.unwrap();
        assert!(index.is_ready());
        assert_eq!(index.len(), 1);
        assert_eq!(index.node_names(), vec!["node2".to_string()]);
    }

    #[tokio::test]
    async fn sync_reports_watch_errors() {
        let snapshot = two_nodes();
        let events = futures::stream::iter(vec![
            Ok(watcher::Event::Init),
            Err(watcher::Error::WatchError(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "too old resource version".to_string(),
                reason: "Expired".to_string(),
                code: 410,
            })),
        ]);

        let err = sync_topology(events, &snapshot).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TopologySync(ref m) if m.contains("too old")));
    }

    #[tokio::test]
    async fn sync_fails_when_stream_ends_early() {
        let snapshot = two_nodes();
        let events = futures::stream::iter(vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(mock::pod("a", "node1", "1", "1Gi"))),
        ]);

        let err = sync_topology(events, &snapshot).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TopologySync(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn static_state_serves_replaced_objects() {
        let provider = StaticClusterState::default();
        provider.set_nodes(vec![mock::node("node1", "4", "8Gi")]);
        provider.set_pods(vec![mock::pod("p", "node1", "1", "1Gi")]);

        assert_eq!(provider.list_nodes().await.unwrap().len(), 1);
        assert_eq!(provider.list_pods().await.unwrap().len(), 1);
    }

    #[test]
    fn fixtures_convert() {
        let node = mock::cordoned(mock::tainted(
            mock::labeled(mock::node("node1", "2", "4Gi"), "zone", "a"),
            "purpose",
            "database",
            "NoSchedule",
        ));
        let snapshot = Snapshot::build(&[node], &[]).unwrap();
        let record = &snapshot.nodes()[0];

        assert!(record.cordoned);
        assert_eq!(record.labels["zone"], "a");
        assert_eq!(record.taints.len(), 1);
        assert_eq!(
            record.allocatable,
            ResourceList::cpu_memory(2000, 4 * 1024 * 1024 * 1024)
        );

        let workload: Workload =
            workload_from_pod(&mock::pod("p", "node1", "250m", "100Mi")).unwrap();
        assert_eq!(
            workload.requests,
            ResourceList::cpu_memory(250, 100 * 1024 * 1024)
        );
    }
}
