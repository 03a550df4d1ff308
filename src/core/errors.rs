use thiserror::Error;

use crate::plan::task::TaskStatus;

/// Unified error type for the taskplan library
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Configuration errors, raised at construction time
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Referenced task does not exist in the plan
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A task was added twice to a plan
    #[error("Task already exists: {0}")]
    TaskAlreadyExists(String),

    /// An outcome was reported for a task that is not currently running
    #[error("Task {path} is not reportable (current status: {status:?})")]
    TaskNotClaimable { path: String, status: TaskStatus },

    /// A task names a dependency that is not part of the plan
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// The declared dependencies contain a cycle
    #[error("Task dependency cycle detected")]
    DependencyCycle,

    /// A worker task aborted instead of running to completion
    #[error("Worker {worker} aborted: {message}")]
    WorkerAborted { worker: usize, message: String },
}

impl ExecutorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ExecutorError::Configuration {
            message: message.into(),
        }
    }
}

/// Result type alias using ExecutorError
pub type Result<T> = std::result::Result<T, ExecutorError>;
