use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::core::errors::{ExecutorError, Result};
use crate::plan::execution_plan::{Claim, ExecutionPlan};
use crate::plan::task::{Task, TaskOutcome, TaskStatus};

/// Mutable plan bookkeeping, guarded by a single lock.
///
/// Every status transition (eligible -> claimed -> finished) happens under
/// this lock, which is what makes claim-exactly-once hold under concurrent
/// workers.
#[derive(Debug)]
struct PlanState {
    statuses: HashMap<String, TaskStatus>,
    /// Tasks whose dependencies have all completed, not yet claimed
    ready: VecDeque<String>,
    /// Reverse dependency index: dependents[a] contains b if b depends on a
    dependents: HashMap<String, Vec<String>>,
    /// Tasks not yet in a terminal status
    unfinished: usize,
}

/// In-memory execution plan with safe concurrent claiming.
///
/// Built via [`PlanBuilder`](crate::plan::builder::PlanBuilder), which has
/// already validated the dependency graph, so the plan only tracks state.
pub struct TaskExecutionPlan {
    arena: DashMap<String, Arc<Task>>,
    state: Mutex<PlanState>,
    /// Wakes claimants when tasks become eligible or the plan finishes
    work_available: Notify,
    completed: watch::Sender<bool>,
}

impl std::fmt::Debug for TaskExecutionPlan {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        formatter
            .debug_struct("TaskExecutionPlan")
            .field("tasks", &self.arena.len())
            .field("ready", &state.ready.len())
            .field("unfinished", &state.unfinished)
            .finish()
    }
}

impl TaskExecutionPlan {
    pub(crate) fn new(tasks: Vec<Arc<Task>>) -> Self {
        let arena = DashMap::new();
        let mut statuses = HashMap::new();
        let mut ready = VecDeque::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for task in &tasks {
            if task.dependencies.is_empty() {
                statuses.insert(task.path.clone(), TaskStatus::Ready);
                ready.push_back(task.path.clone());
            } else {
                statuses.insert(task.path.clone(), TaskStatus::Pending);
                for dep in &task.dependencies {
                    dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(task.path.clone());
                }
            }
            arena.insert(task.path.clone(), Arc::clone(task));
        }

        let unfinished = tasks.len();
        let (completed, _) = watch::channel(unfinished == 0);
        Self {
            arena,
            state: Mutex::new(PlanState {
                statuses,
                ready,
                dependents,
                unfinished,
            }),
            work_available: Notify::new(),
            completed,
        }
    }

    fn state(&self) -> MutexGuard<'_, PlanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status of a task, if it exists in the plan
    pub fn status(&self, path: &str) -> Option<TaskStatus> {
        self.state().statuses.get(path).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.state().unfinished == 0
    }

    /// Promote dependents of a completed task whose dependencies are now all
    /// completed
    fn promote_dependents(state: &mut PlanState, arena: &DashMap<String, Arc<Task>>, path: &str) {
        let Some(dependents) = state.dependents.get(path).cloned() else {
            return;
        };
        for dependent in dependents {
            if state.statuses.get(&dependent) != Some(&TaskStatus::Pending) {
                continue;
            }
            let Some(task) = arena.get(&dependent) else {
                continue;
            };
            let eligible = task
                .dependencies
                .iter()
                .all(|dep| state.statuses.get(dep) == Some(&TaskStatus::Completed));
            if eligible {
                debug!(task = %dependent, "all dependencies met, task is ready");
                state.statuses.insert(dependent.clone(), TaskStatus::Ready);
                state.ready.push_back(dependent);
            }
        }
    }

    /// Resolve every transitive dependent of a failed or skipped task to
    /// `Skipped`
    fn skip_dependents(state: &mut PlanState, path: &str) {
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            let Some(dependents) = state.dependents.get(&current).cloned() else {
                continue;
            };
            for dependent in dependents {
                let status = state.statuses.get(&dependent).copied();
                if status.map_or(true, TaskStatus::is_terminal) || status == Some(TaskStatus::Running)
                {
                    continue;
                }
                debug!(task = %dependent, failed = %current, "skipping task, dependency did not complete");
                state.statuses.insert(dependent.clone(), TaskStatus::Skipped);
                state.ready.retain(|p| p != &dependent);
                state.unfinished -= 1;
                stack.push(dependent);
            }
        }
    }

    fn finish_if_done(&self, state: &PlanState) {
        if state.unfinished == 0 {
            info!("all tasks in the plan have finished");
            // send_replace records the value even when no receiver is
            // subscribed yet; late await_completion callers must still
            // observe completion.
            self.completed.send_replace(true);
        }
    }
}

#[async_trait]
impl ExecutionPlan for TaskExecutionPlan {
    fn tasks(&self) -> Vec<Arc<Task>> {
        self.arena
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    async fn claim_next_task(&self) -> Claim {
        loop {
            // Register for wakeup before inspecting state, so a report that
            // lands between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.work_available.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.unfinished == 0 {
                    return Claim::Finished;
                }
                if let Some(path) = state.ready.pop_front() {
                    state.statuses.insert(path.clone(), TaskStatus::Running);
                    drop(state);
                    if let Some(task) = self.arena.get(&path) {
                        debug!(task = %path, "task claimed");
                        return Claim::Task(Arc::clone(task.value()));
                    }
                    // Arena and statuses are populated together; a ready
                    // entry without an arena entry cannot happen.
                    warn!(task = %path, "ready task missing from arena");
                    continue;
                }
            }
            notified.await;
        }
    }

    fn report_outcome(&self, path: &str, outcome: TaskOutcome) -> Result<()> {
        let mut state = self.state();
        match state.statuses.get(path).copied() {
            Some(TaskStatus::Running) => {}
            Some(status) => {
                return Err(ExecutorError::TaskNotClaimable {
                    path: path.to_string(),
                    status,
                })
            }
            None => return Err(ExecutorError::TaskNotFound(path.to_string())),
        }

        match outcome {
            TaskOutcome::Success => {
                debug!(task = %path, "task completed");
                state.statuses.insert(path.to_string(), TaskStatus::Completed);
                state.unfinished -= 1;
                Self::promote_dependents(&mut state, &self.arena, path);
            }
            TaskOutcome::Failure(message) => {
                warn!(task = %path, error = %message, "task failed");
                state.statuses.insert(path.to_string(), TaskStatus::Failed);
                state.unfinished -= 1;
                Self::skip_dependents(&mut state, path);
            }
        }

        self.finish_if_done(&state);
        drop(state);
        self.work_available.notify_waiters();
        Ok(())
    }

    async fn await_completion(&self) {
        let mut rx = self.completed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn abort(&self) {
        let mut guard = self.state();
        let state = &mut *guard;
        for (path, status) in state.statuses.iter_mut() {
            if !status.is_terminal() && *status != TaskStatus::Running {
                debug!(task = %path, "skipping task, plan aborted");
                *status = TaskStatus::Skipped;
                state.unfinished -= 1;
            }
        }
        state.ready.clear();
        // Running tasks still report their own outcome
        self.finish_if_done(state);
        drop(guard);
        self.work_available.notify_waiters();
    }
}
