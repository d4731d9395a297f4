//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors that can occur while simulating a placement.
///
/// An infeasible placement is not an error; it is reported through
/// [`Verdict::Infeasible`](crate::Verdict::Infeasible).
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Cluster state could not be read or converted.
    #[error("Failed to retrieve cluster state: {0}")]
    Retrieval(String),

    /// A listing or sync did not finish within its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The topology index could not be populated.
    #[error("Topology index sync failed: {0}")]
    TopologySync(String),

    /// A predicate reported an error for a workload.
    #[error("Predicate {predicate} failed for workload {workload}: {message}")]
    Predicate {
        /// Name of the predicate that failed.
        predicate: &'static str,
        /// Name of the workload being evaluated.
        workload: String,
        /// The error message reported by the predicate.
        message: String,
    },

    /// The simulation input is invalid.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A quantity or resource name could not be interpreted.
    #[error("Resource error: {0}")]
    Resource(#[from] cassctl_core::CoreError),
}

impl SchedulerError {
    /// Check if this error is retriable.
    ///
    /// The simulator itself never retries; callers may use this to decide.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_) | Self::Timeout(_) | Self::TopologySync(_)
        )
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
