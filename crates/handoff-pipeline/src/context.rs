//! Execution context for task runs.

use handoff_state::Authority;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context passed to a task when a runner executes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Identifier of the workflow run this task belongs to.
    pub run_id: Uuid,

    /// Workflow identifier.
    pub workflow_id: String,

    /// Task identifier within the workflow.
    pub task_id: String,

    /// Orchestrator the runner is acting as.
    pub role: Authority,
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(
        run_id: Uuid,
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        role: Authority,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            role,
        }
    }

    /// Context for running a single task outside of a workflow run.
    pub fn standalone(workflow_id: impl Into<String>, task_id: impl Into<String>, role: Authority) -> Self {
        Self::new(Uuid::new_v4(), workflow_id, task_id, role)
    }
}
