//! End-to-end feasibility estimation.
//!
//! [`Estimator`] ties the pieces together: it lists nodes and pods through a
//! [`ClusterStateProvider`], builds a fresh [`Snapshot`], obtains a ready
//! [`TopologyIndex`], and runs the [`PlacementEngine`]. All state is owned
//! by the call and dropped when it returns.

use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::k8s::ClusterStateProvider;
use crate::model::{Workload, WorkloadProfile};
use crate::placement::{PlacementEngine, Session};
use crate::snapshot::Snapshot;
use crate::topology::TopologyIndex;
use crate::types::{SimulationConfig, SimulationReport};
use crate::{Result, SchedulerError};

/// Answers "would these workloads fit right now?" for one cluster.
pub struct Estimator<P> {
    provider: P,
    config: SimulationConfig,
    engine: PlacementEngine,
}

impl<P: ClusterStateProvider> Estimator<P> {
    /// Create an estimator with the standard predicate chain.
    #[must_use]
    pub fn new(provider: P, config: SimulationConfig) -> Self {
        Self {
            provider,
            config,
            engine: PlacementEngine::default(),
        }
    }

    /// Replace the placement engine.
    #[must_use]
    pub fn with_engine(mut self, engine: PlacementEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Get a reference to the provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Get a reference to the simulation config.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// List nodes and pods and build a snapshot, bounded by the list timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Timeout`] if listing takes too long, or the
    /// provider's error if a listing fails.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let limit = self.config.list_timeout();
        timeout(limit, async {
            let nodes = self.provider.list_nodes().await?;
            let pods = self.provider.list_pods().await?;
            Snapshot::build(&nodes, &pods)
        })
        .await
        .map_err(|_| {
            SchedulerError::Timeout(format!(
                "listing nodes and pods took longer than {}s",
                limit.as_secs()
            ))
        })?
    }

    /// Obtain a ready topology index, bounded by the sync timeout.
    async fn topology(&self, snapshot: &Snapshot) -> Result<TopologyIndex> {
        let limit = self.config.sync_timeout();
        let deadline = Instant::now() + limit;

        let index = timeout_at(deadline, self.provider.topology_index(snapshot))
            .await
            .map_err(|_| {
                SchedulerError::Timeout(format!(
                    "topology sync took longer than {}s",
                    limit.as_secs()
                ))
            })??;

        index
            .wait_ready_timeout(deadline.saturating_duration_since(Instant::now()))
            .await?;
        Ok(index)
    }

    /// Decide whether every workload in the batch can be placed.
    ///
    /// Workloads are placed in batch order; the verdict is infeasible at the
    /// first one that fits nowhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is empty, the configuration is invalid,
    /// cluster state cannot be retrieved in time, or a workload is malformed.
    pub async fn estimate(&self, workloads: &[Workload]) -> Result<SimulationReport> {
        if workloads.is_empty() {
            return Err(SchedulerError::InvalidInput(
                "at least one workload is required".to_string(),
            ));
        }
        self.config.validate()?;

        let snapshot = self.snapshot().await?;
        let topology = self.topology(&snapshot).await?;
        debug!(
            nodes = snapshot.len(),
            indexed = topology.len(),
            workloads = workloads.len(),
            "Starting placement"
        );

        let mut session = Session::new(snapshot, &topology, workloads);
        self.engine.run(&mut session)?;
        let report = session.into_report();

        info!(
            verdict = %report.verdict,
            requested = workloads.len(),
            placed = report.assignments.len(),
            "Feasibility estimate complete"
        );
        Ok(report)
    }

    /// Decide whether `count` identical workloads built from `profile` fit.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidInput`] for a zero count or negative
    /// requests, otherwise as [`Estimator::estimate`].
    pub async fn estimate_uniform(
        &self,
        count: usize,
        profile: &WorkloadProfile,
    ) -> Result<SimulationReport> {
        if count == 0 {
            return Err(SchedulerError::InvalidInput(
                "pod count must be positive".to_string(),
            ));
        }
        if profile.cpu_millis < 0 || profile.memory_bytes < 0 {
            return Err(SchedulerError::InvalidInput(
                "resource requests must not be negative".to_string(),
            ));
        }
        self.estimate(&profile.workloads(count)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::{self, StaticClusterState};
    use crate::types::Verdict;
    use std::time::Duration;

    fn estimator(provider: StaticClusterState) -> Estimator<StaticClusterState> {
        Estimator::new(provider, SimulationConfig::default())
    }

    fn two_nodes() -> StaticClusterState {
        StaticClusterState::new(
            vec![
                mock::node("node1", "4", "8Gi"),
                mock::node("node2", "4", "8Gi"),
            ],
            vec![mock::pod("running", "node1", "3", "1Gi")],
        )
    }

    #[tokio::test]
    async fn uniform_batch_uses_free_capacity() {
        let estimator = estimator(two_nodes());
        let profile = WorkloadProfile::new(2000, 2 * 1024 * 1024 * 1024);

        let report = estimator.estimate_uniform(1, &profile).await.unwrap();
        assert!(report.is_feasible());
        assert_eq!(report.assignments[0].node, "node2");

        let report = estimator.estimate_uniform(2, &profile).await.unwrap();
        assert_eq!(
            report.verdict,
            Verdict::Infeasible {
                requested: 2,
                schedulable: 1
            }
        );
    }

    #[tokio::test]
    async fn custom_engine_replaces_standard_chain() {
        use crate::predicates::{PredicateChain, UnschedulableExclusion};

        let chain = PredicateChain::new(vec![Box::new(UnschedulableExclusion)]);
        let estimator = estimator(two_nodes()).with_engine(PlacementEngine::new(chain));
        let profile = WorkloadProfile::new(2000, 2 * 1024 * 1024 * 1024);

        let report = estimator.estimate_uniform(2, &profile).await.unwrap();
        assert!(report.is_feasible());
        assert_eq!(report.assignments[1].node, "node2");
    }

    #[tokio::test]
    async fn calls_do_not_share_state() {
        let estimator = estimator(two_nodes());
        let profile = WorkloadProfile::new(500, 1024);

        let first = estimator.estimate_uniform(2, &profile).await.unwrap();
        let second = estimator.estimate_uniform(2, &profile).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(estimator.provider().list_calls(), 4);
    }

    #[tokio::test]
    async fn rejects_empty_batches() {
        let estimator = estimator(two_nodes());
        assert!(matches!(
            estimator.estimate(&[]).await,
            Err(SchedulerError::InvalidInput(_))
        ));
        assert!(matches!(
            estimator.estimate_uniform(0, &WorkloadProfile::new(1, 1)).await,
            Err(SchedulerError::InvalidInput(_))
        ));
        assert!(matches!(
            estimator.estimate_uniform(1, &WorkloadProfile::new(-1, 1)).await,
            Err(SchedulerError::InvalidInput(_))
        ));
        assert_eq!(estimator.provider().list_calls(), 0);
    }

    #[tokio::test]
    async fn retrieval_errors_propagate() {
        let estimator = estimator(two_nodes().failing("forbidden"));
        let err = estimator
            .estimate_uniform(1, &WorkloadProfile::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Retrieval(_)));
        assert_eq!(estimator.provider().list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_listing_times_out() {
        let config = SimulationConfig {
            list_timeout_secs: 5,
            ..Default::default()
        };
        let estimator = Estimator::new(two_nodes().with_delay(Duration::from_secs(10)), config);

        let err = estimator
            .estimate_uniform(1, &WorkloadProfile::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test(start_paused = true)]
    async fn unready_topology_times_out() {
        let config = SimulationConfig {
            sync_timeout_secs: 2,
            ..Default::default()
        };
        let estimator = Estimator::new(two_nodes().with_unready_topology(), config);

        let err = estimator
            .estimate_uniform(1, &WorkloadProfile::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout(ref m) if m.contains("topology")));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = SimulationConfig {
            sync_timeout_secs: 0,
            ..Default::default()
        };
        let estimator = Estimator::new(two_nodes(), config);
        assert!(matches!(
            estimator.estimate_uniform(1, &WorkloadProfile::new(1, 1)).await,
            Err(SchedulerError::Config(_))
        ));
    }
}
