//! Task execution error types.

use handoff_state::StateError;
use thiserror::Error;

/// Errors that can occur while defining or running a workflow.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Workflow definition is invalid.
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Task execution failed.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Process spawn error.
    #[error("Process error: {0}")]
    Process(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Execution authority could not be resolved.
    #[error("Migration state error: {0}")]
    State(#[from] StateError),
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Io(e.to_string())
    }
}

impl From<duckdb::Error> for TaskError {
    fn from(e: duckdb::Error) -> Self {
        TaskError::Database(e.to_string())
    }
}

impl From<envy::Error> for TaskError {
    fn from(e: envy::Error) -> Self {
        TaskError::Configuration(e.to_string())
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(e: tokio::task::JoinError) -> Self {
        TaskError::Execution(format!("Task panicked or was cancelled: {}", e))
    }
}
