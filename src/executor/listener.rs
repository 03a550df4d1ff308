use crate::plan::task::{Task, TaskOutcome};

/// Observes task start/finish events during plan execution.
///
/// Callbacks run inside the worker's exclusive cache region and must be
/// cheap; heavy reporting belongs elsewhere.
pub trait ExecutionListener: Send + Sync {
    fn before_task(&self, _task: &Task) {}
    fn after_task(&self, _task: &Task, _outcome: &TaskOutcome) {}
}

/// Listener that ignores all events
pub struct NoopListener;

impl ExecutionListener for NoopListener {}
