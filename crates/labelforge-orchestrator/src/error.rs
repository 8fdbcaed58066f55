// Error types for queueing and supervising training runs

use labelforge_core::{ConfigIssue, CoreError};
use labelforge_training::JobId;
use thiserror::Error;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Rejected queue transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} is running and cannot be cancelled or removed")]
    Running(JobId),

    #[error("job {id} is already {status}")]
    AlreadyFinished { id: JobId, status: String },

    #[error("job {id} is {status}, expected {expected}")]
    InvalidTransition { id: JobId, status: String, expected: &'static str },

    #[error("job {0} is already running")]
    SlotTaken(JobId),

    #[error("invalid reorder indices {from} -> {to} for {len} pending jobs")]
    InvalidIndex { from: usize, to: usize, len: usize },
}

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected before anything was spawned
    #[error("invalid training configuration: {0}")]
    Config(#[from] ConfigIssue),

    #[error("training is already running for project '{0}'")]
    AlreadyRunning(String),

    #[error("no training is running for project '{0}'")]
    NotRunning(String),

    /// Missing interpreter or similar host problem
    #[error("environment error: {0}")]
    Environment(String),

    #[error("failed to launch training process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_issue_converts() {
        let err: OrchestratorError = ConfigIssue::EmptyPath.into();
        assert!(matches!(err, OrchestratorError::Config(ConfigIssue::EmptyPath)));
        assert!(err.to_string().contains("path must not be empty"));
    }

    #[test]
    fn test_queue_error_message() {
        let err = QueueError::Running(JobId::from("job_1"));
        assert_eq!(err.to_string(), "job job_1 is running and cannot be cancelled or removed");
    }
}
