pub mod builder;
pub mod default_plan;
pub mod execution_plan;
pub mod task;

pub use builder::PlanBuilder;
pub use default_plan::TaskExecutionPlan;
pub use execution_plan::{Claim, ExecutionPlan};
pub use task::{GroupId, Task, TaskOutcome, TaskStatus};
