use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition key over tasks (a "project" in build-tool terms).
///
/// Groups only cap worker-pool size; they never order tasks.
pub type GroupId = String;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting on unfinished dependencies
    Pending,
    /// All dependencies completed, eligible for claiming
    Ready,
    /// Claimed by a worker and executing
    Running,
    Completed,
    Failed,
    /// Not run because a dependency failed, or the plan was aborted
    Skipped,
}

impl TaskStatus {
    /// Terminal statuses count towards plan completion
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Outcome a worker reports for an executed task.
///
/// `Skipped` is derived by the plan from failed dependencies and is never
/// reported directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    Failure(String),
}

/// An opaque unit of work in an execution plan.
///
/// The task carries identity, grouping and dependency edges; what executing
/// it means is up to the `TaskProcessor` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique path identifying the task, e.g. `:app:compile`
    pub path: String,
    /// The group (project) this task belongs to
    pub group: GroupId,
    /// Paths of tasks that must complete successfully first
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        path: impl Into<String>,
        group: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            group: group.into(),
            dependencies,
            created_at: Utc::now(),
        }
    }
}
