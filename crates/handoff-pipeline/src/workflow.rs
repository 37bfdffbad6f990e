//! Workflow definitions.
//!
//! A workflow is an ordered list of named tasks. Dependencies are recorded and
//! checked (each must name a task declared earlier) but tasks always execute
//! in declaration order.

use async_trait::async_trait;
use handoff_state::{validate_identifier, validate_task_id};
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::result::TaskResult;

/// Executable body of a task.
#[async_trait]
pub trait Task: Send + Sync {
    /// Short name of the kind of work this task does (e.g. "duckdb_load").
    fn kind(&self) -> &'static str;

    /// Run the task.
    async fn run(&self, ctx: &ExecutionContext) -> Result<TaskResult, TaskError>;
}

/// A named unit of work within a workflow.
#[derive(Clone)]
pub struct TaskDefinition {
    pub id: String,
    pub depends_on: Vec<String>,
    pub body: Arc<dyn Task>,
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("kind", &self.body.kind())
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// An ordered set of tasks under one workflow id.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    id: String,
    tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    /// Create an empty workflow.
    pub fn new(id: impl Into<String>) -> Result<Self, TaskError> {
        let id = id.into();
        validate_identifier("workflow", &id)?;
        Ok(Self {
            id,
            tasks: Vec::new(),
        })
    }

    /// Append a task, checking its id and dependencies.
    pub fn add_task<T: Task + 'static>(
        &mut self,
        id: impl Into<String>,
        depends_on: &[&str],
        body: T,
    ) -> Result<(), TaskError> {
        let id = id.into();
        validate_task_id(&id)?;

        if self.has(&id) {
            return Err(TaskError::Workflow(format!(
                "Workflow '{}': duplicate task id '{}'",
                self.id, id
            )));
        }

        let mut seen = HashSet::new();
        for dep in depends_on {
            if !self.has(dep) {
                return Err(TaskError::Workflow(format!(
                    "Workflow '{}': task '{}' depends on unknown or later task '{}'",
                    self.id, id, dep
                )));
            }
            if !seen.insert(*dep) {
                return Err(TaskError::Workflow(format!(
                    "Workflow '{}': task '{}' lists dependency '{}' twice",
                    self.id, id, dep
                )));
            }
        }

        self.tasks.push(TaskDefinition {
            id,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            body: Arc::new(body),
        });
        Ok(())
    }

    /// Builder form of [`WorkflowDefinition::add_task`].
    pub fn with_task<T: Task + 'static>(
        mut self,
        id: impl Into<String>,
        depends_on: &[&str],
        body: T,
    ) -> Result<Self, TaskError> {
        self.add_task(id, depends_on, body)?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Check if a task is defined.
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Task ids in declaration order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }
}
