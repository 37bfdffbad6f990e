//! What a task run produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
        })
    }
}

/// Task-specific output, tagged by `output` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum TaskOutput {
    /// No output worth reporting.
    None,
    /// A DuckDB table was (re)built from a CSV file.
    Loaded { table: String, rows: i64 },
    /// A DuckDB table was written to a CSV file.
    Exported { csv_path: PathBuf, rows: i64 },
    /// A child process ran; `exit_code` is absent when it was killed.
    Process {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Outcome of one task run, as recorded in a run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(flatten)]
    pub output: TaskOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskResult {
    fn new(status: TaskStatus, output: TaskOutput, error: Option<String>) -> Self {
        Self {
            status,
            output,
            error,
            duration_ms: 0,
        }
    }

    pub fn succeeded(output: TaskOutput) -> Self {
        Self::new(TaskStatus::Succeeded, output, None)
    }

    /// A run that failed before producing anything.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::Failed, TaskOutput::None, Some(message.into()))
    }

    /// Result of a process that exited on its own. Non-zero exit is a failure.
    pub fn exited(program: &str, exit_code: i32, stdout: String, stderr: String) -> Self {
        let output = TaskOutput::Process {
            exit_code: Some(exit_code),
            stdout,
            stderr,
        };
        if exit_code == 0 {
            Self::succeeded(output)
        } else {
            Self::new(
                TaskStatus::Failed,
                output,
                Some(format!("{} exited with code {}", program, exit_code)),
            )
        }
    }

    /// Result of a process killed after `limit`, keeping what it printed.
    pub fn timed_out(program: &str, limit: Duration, stdout: String, stderr: String) -> Self {
        Self::new(
            TaskStatus::TimedOut,
            TaskOutput::Process {
                exit_code: None,
                stdout,
                stderr,
            },
            Some(format!("{} killed after {}s", program, limit.as_secs())),
        )
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// Rows touched by a load or export.
    pub fn rows(&self) -> Option<i64> {
        match self.output {
            TaskOutput::Loaded { rows, .. } | TaskOutput::Exported { rows, .. } => Some(rows),
            _ => None,
        }
    }
}
