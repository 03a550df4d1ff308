use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::plan::task::{Task, TaskOutcome};

/// Result of asking a plan for the next task to execute
#[derive(Debug, Clone)]
pub enum Claim {
    /// A task claimed exclusively by the calling worker
    Task(Arc<Task>),
    /// Every task in the plan has reached a terminal status
    Finished,
}

/// The executor's view of a resolved task dependency plan.
///
/// The plan owns all dependency bookkeeping and must be safe under
/// concurrent claim/report calls from every worker simultaneously: a task is
/// handed out at most once, only after all of its dependencies completed,
/// and its result is recorded exactly once.
#[async_trait]
pub trait ExecutionPlan: Send + Sync {
    /// All tasks in the plan. Used once at startup to size the worker pool.
    fn tasks(&self) -> Vec<Arc<Task>>;

    /// Claim the next eligible task.
    ///
    /// Suspends the caller while no task is eligible but the plan is not yet
    /// finished; wakes when another task finishes or the plan is aborted.
    async fn claim_next_task(&self) -> Claim;

    /// Record the outcome of a previously claimed task.
    ///
    /// A failure resolves every transitive dependent to `Skipped`. Reporting
    /// a task that is not currently running is an error.
    fn report_outcome(&self, path: &str, outcome: TaskOutcome) -> Result<()>;

    /// Wait until every task in the plan is terminal.
    ///
    /// Idempotent: returns immediately if the plan is already finished.
    async fn await_completion(&self);

    /// Skip every non-terminal task and release all waiting claimants.
    fn abort(&self);
}
