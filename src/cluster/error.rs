use std::path::PathBuf;

use thiserror::Error;

use crate::workload::NodeId;

/// A specialized `Result` type for experiment operations.
pub type ExperimentResult<T> = Result<T, ExperimentError>;

/// Structured error type used throughout the experiment driver.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Invalid workload: {0}")]
    InvalidWorkloadSpec(String),

    #[error("Duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: NodeId },

    #[error("No server with id {0}")]
    UnknownServer(NodeId),

    #[error("No client with id {0}")]
    UnknownClient(NodeId),

    #[error("Incomplete cluster spec: {0}")]
    IncompleteSpec(String),

    #[error("Invalid quorum (read={read}, write={write}) for cluster of size {cluster_size}")]
    InvalidQuorum {
        read: usize,
        write: usize,
        cluster_size: usize,
    },

    #[error("Log directory {} was already used by a previous run", .0.display())]
    LogDirectoryReused(PathBuf),

    #[error("Run into {} failed: {reason}", .log_directory.display())]
    RunFailed {
        log_directory: PathBuf,
        reason: String,
    },

    #[error("Failed to provision cluster: {0}")]
    Provisioning(String),

    #[error("Failed to shut down cluster: {0}")]
    Shutdown(String),

    #[error("Invalid experiment: {0}")]
    InvalidExperiment(String),

    #[error("Cluster has already been shut down")]
    ClusterShutDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExperimentError {
    pub(crate) fn invalid_workload(message: impl Into<String>) -> Self {
        Self::InvalidWorkloadSpec(message.into())
    }

    pub(crate) fn incomplete(message: impl Into<String>) -> Self {
        Self::IncompleteSpec(message.into())
    }

    // Returns true for errors which only affect a single run, as opposed to errors
    // indicating a broken experiment description.
    pub fn is_run_failure(&self) -> bool {
        matches!(self, Self::RunFailed { .. })
    }
}
