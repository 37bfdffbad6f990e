//! Error types for the migration state store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading, validating or persisting migration state.
///
/// None of these are recoverable by guessing: an orchestrator that receives
/// one must refuse to run the task it was deciding about.
#[derive(Debug, Error)]
pub enum StateError {
    /// No migration state document exists for the workflow.
    #[error("No migration state for workflow '{workflow}' (expected {})", path.display())]
    NotFound { workflow: String, path: PathBuf },

    /// The document exists but could not be parsed, or violates uniqueness.
    #[error("Malformed migration state at {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// The document could not be read for a reason other than absence.
    #[error("Failed to read migration state at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisting the document failed.
    #[error("Failed to write migration state at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A workflow or task identifier is not usable.
    #[error("Invalid {kind} identifier: '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// A state built by the caller lists the same task twice.
    #[error("Duplicate task id '{task}'")]
    DuplicateTask { task: String },

    /// `init` was asked to create a document that is already there.
    #[error("Migration state for workflow '{workflow}' already exists at {}", path.display())]
    AlreadyExists { workflow: String, path: PathBuf },
}

impl StateError {
    /// Returns true for write failures, the only kind worth retrying.
    pub fn is_write(&self) -> bool {
        matches!(self, StateError::Write { .. })
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StateError::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Write {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using StateError.
pub type StateResult<T> = Result<T, StateError>;
