// Core infrastructure modules
pub mod core {
    pub mod errors;
}

// Plan execution building blocks
pub mod cache;
pub mod executor;
pub mod plan;

// Re-exports for convenience
pub use crate::core::errors::{ExecutorError, Result};
pub use cache::StateCacheAccess;
pub use executor::{
    ExecutionListener, ExecutionReport, NoopListener, ParallelPlanExecutor, TaskExecutorWorker,
    TaskProcessor, WorkerSummary,
};
pub use plan::{
    Claim, ExecutionPlan, GroupId, PlanBuilder, Task, TaskExecutionPlan, TaskOutcome, TaskStatus,
};
