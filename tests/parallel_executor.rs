//! End-to-end tests for the parallel plan executor: pool sizing, dependency
//! ordering, claim-exactly-once and failure propagation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use taskplan::{
    ExecutionListener, ExecutionPlan, ExecutorError, ParallelPlanExecutor, PlanBuilder,
    StateCacheAccess, Task, TaskExecutionPlan, TaskOutcome, TaskProcessor, TaskStatus,
};

/// Test double for the out-of-scope task execution collaborator.
///
/// Records how often each task ran, when it started and finished, and how
/// many executions overlapped in time.
#[derive(Default)]
struct RecordingProcessor {
    delay: Duration,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    runs: DashMap<String, usize>,
    times: DashMap<String, (Instant, Instant)>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingProcessor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    fn panicking(mut self, path: &str) -> Self {
        self.panicking.insert(path.to_string());
        self
    }

    fn run_count(&self, path: &str) -> usize {
        self.runs.get(path).map(|entry| *entry.value()).unwrap_or(0)
    }
}

#[async_trait]
impl TaskProcessor for RecordingProcessor {
    async fn process(&self, task: &Task) -> anyhow::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let start = Instant::now();
        *self.runs.entry(task.path.clone()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.times.insert(task.path.clone(), (start, Instant::now()));

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.panicking.contains(&task.path) {
            panic!("simulated panic in {}", task.path);
        }
        if self.failing.contains(&task.path) {
            anyhow::bail!("simulated failure of {}", task.path);
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionListener for RecordingListener {
    fn before_task(&self, task: &Task) {
        self.events
            .lock()
            .unwrap()
            .push(("before".into(), task.path.clone()));
    }

    fn after_task(&self, task: &Task, _outcome: &TaskOutcome) {
        self.events
            .lock()
            .unwrap()
            .push(("after".into(), task.path.clone()));
    }
}

fn executor(parallelism: usize) -> ParallelPlanExecutor {
    let _ = tracing_subscriber::fmt::try_init();
    ParallelPlanExecutor::new(Arc::new(StateCacheAccess::new()), parallelism)
        .expect("valid executor configuration")
}

async fn run_plan(
    parallelism: usize,
    plan: Arc<TaskExecutionPlan>,
    processor: Arc<RecordingProcessor>,
) -> taskplan::ExecutionReport {
    executor(parallelism)
        .process(
            Arc::clone(&plan) as Arc<dyn ExecutionPlan>,
            processor,
            Arc::new(RecordingListener::default()),
        )
        .await
        .expect("plan execution should not raise")
}

#[tokio::test(flavor = "multi_thread")]
async fn single_group_caps_pool_at_one_worker() {
    let mut builder = PlanBuilder::new();
    builder.add_task(":app:a", ":app", vec![]).unwrap();
    builder
        .add_task(":app:b", ":app", vec![":app:a".into()])
        .unwrap();
    builder.add_task(":app:c", ":app", vec![]).unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::with_delay(Duration::from_millis(5)));
    let report = run_plan(2, Arc::clone(&plan), Arc::clone(&processor)).await;

    // configuredParallelism = 2, one group => exactly one worker
    assert_eq!(report.workers.len(), 1);
    for path in [":app:a", ":app:b", ":app:c"] {
        assert_eq!(plan.status(path), Some(TaskStatus::Completed));
        assert_eq!(processor.run_count(path), 1);
    }

    // b never starts before a has finished
    let a_finish = processor.times.get(":app:a").unwrap().1;
    let b_start = processor.times.get(":app:b").unwrap().0;
    assert!(b_start >= a_finish);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_count_is_min_of_parallelism_and_groups() {
    let mut builder = PlanBuilder::new();
    builder.add_task(":a:build", ":a", vec![]).unwrap();
    builder.add_task(":b:build", ":b", vec![]).unwrap();
    builder.add_task(":c:build", ":c", vec![]).unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::default());
    let report = run_plan(8, plan, processor).await;

    assert_eq!(report.workers.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_task_is_claimed_exactly_once() {
    let mut builder = PlanBuilder::new();
    for group in 0..8 {
        for task in 0..5 {
            let deps = if task == 0 {
                vec![]
            } else {
                vec![format!(":g{group}:t{}", task - 1)]
            };
            builder
                .add_task(format!(":g{group}:t{task}"), format!(":g{group}"), deps)
                .unwrap();
        }
    }
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::default());
    let report = run_plan(8, Arc::clone(&plan), Arc::clone(&processor)).await;

    assert_eq!(report.workers.len(), 8);
    for group in 0..8 {
        for task in 0..5 {
            let path = format!(":g{group}:t{task}");
            assert_eq!(processor.run_count(&path), 1, "task {path} must run once");
            assert_eq!(plan.status(&path), Some(TaskStatus::Completed));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn task_executions_are_serialized_by_the_cache_gate() {
    let mut builder = PlanBuilder::new();
    for group in 0..4 {
        builder
            .add_task(format!(":g{group}:build"), format!(":g{group}"), vec![])
            .unwrap();
    }
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::with_delay(Duration::from_millis(10)));
    run_plan(4, plan, Arc::clone(&processor)).await;

    assert_eq!(processor.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_skips_dependents_but_drains_independent_work() {
    let mut builder = PlanBuilder::new();
    builder.add_task(":a:fails", ":a", vec![]).unwrap();
    builder
        .add_task(":a:dependent", ":a", vec![":a:fails".into()])
        .unwrap();
    builder.add_task(":b:independent", ":b", vec![]).unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::default().failing(":a:fails"));
    run_plan(2, Arc::clone(&plan), Arc::clone(&processor)).await;

    assert_eq!(plan.status(":a:fails"), Some(TaskStatus::Failed));
    assert_eq!(plan.status(":a:dependent"), Some(TaskStatus::Skipped));
    assert_eq!(plan.status(":b:independent"), Some(TaskStatus::Completed));
    assert_eq!(processor.run_count(":a:dependent"), 0);
    assert_eq!(processor.run_count(":b:independent"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_task_is_recorded_failed_and_process_still_returns() {
    let mut builder = PlanBuilder::new();
    builder.add_task(":a:panics", ":a", vec![]).unwrap();
    builder
        .add_task(":a:dependent", ":a", vec![":a:panics".into()])
        .unwrap();
    builder.add_task(":b:independent", ":b", vec![]).unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::default().panicking(":a:panics"));
    // A worker losing its thread to an unwinding task would leave the task
    // running and this call blocked forever.
    tokio::time::timeout(
        Duration::from_secs(5),
        run_plan(2, Arc::clone(&plan), Arc::clone(&processor)),
    )
    .await
    .expect("process must return after a task panics");

    assert_eq!(plan.status(":a:panics"), Some(TaskStatus::Failed));
    assert_eq!(plan.status(":a:dependent"), Some(TaskStatus::Skipped));
    assert_eq!(plan.status(":b:independent"), Some(TaskStatus::Completed));
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_observes_start_and_finish_of_executed_tasks_only() {
    let mut builder = PlanBuilder::new();
    builder.add_task(":a:fails", ":a", vec![]).unwrap();
    builder
        .add_task(":a:skipped", ":a", vec![":a:fails".into()])
        .unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::default().failing(":a:fails"));
    let listener = Arc::new(RecordingListener::default());
    executor(1)
        .process(
            Arc::clone(&plan) as Arc<dyn ExecutionPlan>,
            processor,
            Arc::clone(&listener) as Arc<dyn ExecutionListener>,
        )
        .await
        .unwrap();

    let events = listener.events();
    assert_eq!(
        events,
        vec![
            ("before".to_string(), ":a:fails".to_string()),
            ("after".to_string(), ":a:fails".to_string()),
        ]
    );
}

#[tokio::test]
async fn empty_plan_is_a_noop() {
    let plan = Arc::new(PlanBuilder::new().build().unwrap());
    let cache = Arc::new(StateCacheAccess::new());
    let report = ParallelPlanExecutor::new(Arc::clone(&cache), 4)
        .unwrap()
        .process(
            Arc::clone(&plan) as Arc<dyn ExecutionPlan>,
            Arc::new(RecordingProcessor::default()),
            Arc::new(RecordingListener::default()),
        )
        .await
        .unwrap();

    assert!(report.workers.is_empty());
    // The long-running session opened and closed around the no-op run
    assert_eq!(cache.open_sessions(), 0);
}

#[tokio::test]
async fn invalid_worker_count_fails_at_construction() {
    let err = ParallelPlanExecutor::new(Arc::new(StateCacheAccess::new()), 0).unwrap_err();
    assert!(matches!(err, ExecutorError::Configuration { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_wait_outlives_worker_startup() {
    // A slow final task: process must not return before it finishes.
    let mut builder = PlanBuilder::new();
    builder.add_task(":a:first", ":a", vec![]).unwrap();
    builder
        .add_task(":a:slow", ":a", vec![":a:first".into()])
        .unwrap();
    let plan = Arc::new(builder.build().unwrap());

    let processor = Arc::new(RecordingProcessor::with_delay(Duration::from_millis(30)));
    run_plan(1, Arc::clone(&plan), processor).await;

    assert!(plan.is_finished());
    assert_eq!(plan.status(":a:slow"), Some(TaskStatus::Completed));
}
