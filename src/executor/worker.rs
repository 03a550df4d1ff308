use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::StateCacheAccess;
use crate::executor::listener::ExecutionListener;
use crate::plan::execution_plan::{Claim, ExecutionPlan};
use crate::plan::task::{Task, TaskOutcome};

/// Executes a single task.
///
/// This is the seam to the surrounding build tool: compiling, running a
/// tool, up-to-date checks. An error return marks the task failed in the
/// plan; it never stops the worker.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &Task) -> anyhow::Result<()>;
}

/// Per-worker busy/idle accounting, purely diagnostic
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub busy: Duration,
    pub total: Duration,
}

impl WorkerSummary {
    pub fn idle(&self) -> Duration {
        self.total.saturating_sub(self.busy)
    }
}

/// One dispatch loop, one per spawned worker.
///
/// Repeatedly claims a task from the plan, executes it under exclusive
/// cache access and records the outcome, until the plan reports that no
/// work remains.
pub struct TaskExecutorWorker {
    id: usize,
    plan: Arc<dyn ExecutionPlan>,
    processor: Arc<dyn TaskProcessor>,
    listener: Arc<dyn ExecutionListener>,
    cache_access: Arc<StateCacheAccess>,
    busy: Duration,
}

impl TaskExecutorWorker {
    pub fn new(
        id: usize,
        plan: Arc<dyn ExecutionPlan>,
        processor: Arc<dyn TaskProcessor>,
        listener: Arc<dyn ExecutionListener>,
        cache_access: Arc<StateCacheAccess>,
    ) -> Self {
        Self {
            id,
            plan,
            processor,
            listener,
            cache_access,
            busy: Duration::ZERO,
        }
    }

    pub async fn run(mut self) -> WorkerSummary {
        let start = Instant::now();
        loop {
            match self.plan.claim_next_task().await {
                Claim::Finished => break,
                Claim::Task(task) => self.execute_with_cache_lock(&task).await,
            }
        }
        let total = start.elapsed();
        let summary = WorkerSummary {
            worker: self.id,
            busy: self.busy,
            total,
        };
        info!(
            worker = self.id,
            busy = %pretty_duration(summary.busy),
            idle = %pretty_duration(summary.idle()),
            "parallel worker stopped"
        );
        summary
    }

    async fn execute_with_cache_lock(&mut self, task: &Arc<Task>) {
        let path = task.path.as_str();
        debug!(worker = self.id, task = %path, "task execution starting");

        let processor = Arc::clone(&self.processor);
        let listener = Arc::clone(&self.listener);
        let worker = self.id;

        let start = Instant::now();
        let outcome = self
            .cache_access
            .exclusive(&format!("Executing {path}"), move || async move {
                // Panics are contained here: an unwinding processor or
                // listener must not kill the worker, which would leave the
                // task permanently running and the plan never finished.
                let execution = AssertUnwindSafe(async {
                    listener.before_task(task);
                    processor.process(task).await
                })
                .catch_unwind()
                .await;
                let outcome = match execution {
                    Ok(Ok(())) => TaskOutcome::Success,
                    Ok(Err(err)) => {
                        error!(worker, task = %task.path, error = %format!("{err:#}"), "task execution failed");
                        TaskOutcome::Failure(format!("{err:#}"))
                    }
                    Err(panic) => {
                        let message = panic_message(panic);
                        error!(worker, task = %task.path, error = %message, "task execution panicked");
                        TaskOutcome::Failure(message)
                    }
                };
                let after = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.after_task(task, &outcome);
                }));
                if after.is_err() {
                    warn!(worker, task = %task.path, "listener panicked observing task finish");
                }
                outcome
            })
            .await;
        self.busy += start.elapsed();

        // Fails only when the plan was aborted underneath a running task
        if let Err(err) = self.plan.report_outcome(path, outcome) {
            warn!(worker = self.id, task = %path, error = %err, "could not record task outcome");
        }
        debug!(worker = self.id, task = %path, "task execution complete");
    }
}

/// Best-effort text for a panic payload caught during task execution
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Human-readable duration for the worker summary log line
fn pretty_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis} ms");
    }
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.3} secs")
    } else {
        let mins = (secs / 60.0).floor() as u64;
        format!("{} mins {:.3} secs", mins, secs - (mins as f64) * 60.0)
    }
}
