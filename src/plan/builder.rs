use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::core::errors::{ExecutorError, Result};
use crate::plan::default_plan::TaskExecutionPlan;
use crate::plan::task::Task;

/// Builds a validated [`TaskExecutionPlan`].
///
/// Validation happens in two places: structural errors (duplicate paths,
/// self-dependencies) are rejected as tasks are added, graph-level errors
/// (unknown dependencies, cycles) when the plan is built.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    tasks: Vec<Arc<Task>>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(
        &mut self,
        path: impl Into<String>,
        group: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Result<&mut Self> {
        let path = path.into();
        if self.tasks.iter().any(|task| task.path == path) {
            return Err(ExecutorError::TaskAlreadyExists(path));
        }
        if dependencies.iter().any(|dep| *dep == path) {
            return Err(ExecutorError::DependencyCycle);
        }
        debug!(task = %path, deps = dependencies.len(), "adding task to plan");
        self.tasks.push(Arc::new(Task::new(path, group, dependencies)));
        Ok(self)
    }

    pub fn build(self) -> Result<TaskExecutionPlan> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        for task in &self.tasks {
            let idx = graph.add_node(task.path.clone());
            indices.insert(task.path.as_str(), idx);
        }
        for task in &self.tasks {
            for dep in &task.dependencies {
                let Some(&dep_idx) = indices.get(dep.as_str()) else {
                    return Err(ExecutorError::UnknownDependency {
                        task: task.path.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.add_edge(dep_idx, indices[task.path.as_str()], ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ExecutorError::DependencyCycle);
        }

        debug!(tasks = self.tasks.len(), "execution plan built");
        Ok(TaskExecutionPlan::new(self.tasks))
    }
}
