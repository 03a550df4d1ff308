use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::StateCacheAccess;
use crate::core::errors::{ExecutorError, Result};
use crate::executor::listener::ExecutionListener;
use crate::executor::worker::{TaskExecutorWorker, TaskProcessor, WorkerSummary};
use crate::plan::execution_plan::ExecutionPlan;

/// Diagnostic report for one `process` call
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per worker that was started
    pub workers: Vec<WorkerSummary>,
}

/// Drives an execution plan to completion with a bounded worker pool.
///
/// The pool is sized once per `process` call as
/// `min(configured parallelism, distinct group count)`: tasks in the same
/// group are not assumed safe to run concurrently with each other, so
/// parallelism beyond the group count cannot help and is not started.
#[derive(Debug)]
pub struct ParallelPlanExecutor {
    cache_access: Arc<StateCacheAccess>,
    executor_count: usize,
}

impl ParallelPlanExecutor {
    /// Rejects an invalid worker count up front, before any plan is run
    pub fn new(cache_access: Arc<StateCacheAccess>, executor_count: usize) -> Result<Self> {
        if executor_count < 1 {
            return Err(ExecutorError::configuration(format!(
                "Not a valid number of parallel executors: {executor_count}"
            )));
        }
        info!(executor_count, "using parallel executor workers");
        Ok(Self {
            cache_access,
            executor_count,
        })
    }

    /// Run every task in the plan to a terminal state.
    ///
    /// Returns once the last task has finished, not merely once all dispatch
    /// loops have started. Individual task failures surface through the
    /// plan's recorded outcomes, never as an error here.
    pub async fn process(
        &self,
        plan: Arc<dyn ExecutionPlan>,
        processor: Arc<dyn TaskProcessor>,
        listener: Arc<dyn ExecutionListener>,
    ) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        self.cache_access
            .long_running_session("Executing all tasks", move || async move {
                let workers = self.execute_plan(plan, processor, listener).await?;
                Ok(ExecutionReport {
                    started_at,
                    finished_at: Utc::now(),
                    workers,
                })
            })
            .await
    }

    async fn execute_plan(
        &self,
        plan: Arc<dyn ExecutionPlan>,
        processor: Arc<dyn TaskProcessor>,
        listener: Arc<dyn ExecutionListener>,
    ) -> Result<Vec<WorkerSummary>> {
        let worker_count = self.executor_count.min(distinct_group_count(plan.as_ref()));
        if worker_count == 0 {
            info!("plan contains no tasks, nothing to execute");
            return Ok(Vec::new());
        }
        info!(workers = worker_count, "starting parallel plan execution");

        let handles: Vec<_> = (0..worker_count)
            .map(|id| {
                let worker = TaskExecutorWorker::new(
                    id,
                    Arc::clone(&plan),
                    Arc::clone(&processor),
                    Arc::clone(&listener),
                    Arc::clone(&self.cache_access),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // Completion of the plan itself, not of worker startup
        plan.await_completion().await;
        debug!("plan reported completion, collecting workers");

        let mut workers = Vec::with_capacity(handles.len());
        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(summary) => workers.push(summary),
                Err(err) => {
                    return Err(ExecutorError::WorkerAborted {
                        worker: id,
                        message: err.to_string(),
                    })
                }
            }
        }
        Ok(workers)
    }
}

/// Number of distinct groups (projects) represented in the plan
fn distinct_group_count(plan: &dyn ExecutionPlan) -> usize {
    let groups: HashSet<String> = plan
        .tasks()
        .iter()
        .map(|task| task.group.clone())
        .collect();
    groups.len()
}
