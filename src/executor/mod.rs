pub mod listener;
pub mod parallel;
pub mod worker;

pub use listener::{ExecutionListener, NoopListener};
pub use parallel::{ExecutionReport, ParallelPlanExecutor};
pub use worker::{TaskExecutorWorker, TaskProcessor, WorkerSummary};
