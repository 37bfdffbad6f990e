//! Execution-authority decision.
//!
//! Both orchestrators call [`Authority::for_task`] against the same document.
//! The rule has exactly two outcomes, so a task can never be claimed by both
//! orchestrators or by neither.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::MigrationState;

/// Which orchestrator is responsible for running a task.
///
/// Also used as the role a runner acts under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    /// The legacy scheduler; owns every task until it is migrated.
    Legacy,
    /// The new orchestrator; owns migrated tasks.
    Orchestrator,
}

impl Authority {
    /// Decide who owns `task_id` under `state`.
    pub fn for_task(state: &MigrationState, task_id: &str) -> Self {
        if state.is_migrated(task_id) {
            Authority::Orchestrator
        } else {
            Authority::Legacy
        }
    }

    /// True when a runner acting as `role` must execute a task owned by `self`.
    pub fn claims(&self, role: Authority) -> bool {
        *self == role
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::Legacy => "legacy",
            Authority::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "airflow" => Ok(Authority::Legacy),
            "orchestrator" | "new" => Ok(Authority::Orchestrator),
            other => Err(format!(
                "unknown orchestrator '{}', expected 'legacy' or 'orchestrator'",
                other
            )),
        }
    }
}

/// Authority for one task, as reported by [`assignments`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: String,
    pub migrated: bool,
    /// False when the task is missing from the document and defaulted.
    pub listed: bool,
    pub authority: Authority,
}

/// Resolve authority for every task in `task_ids`.
pub fn assignments<'a>(
    state: &MigrationState,
    task_ids: impl IntoIterator<Item = &'a str>,
) -> Vec<Assignment> {
    task_ids
        .into_iter()
        .map(|task_id| Assignment {
            task_id: task_id.to_string(),
            migrated: state.is_migrated(task_id),
            listed: state.contains(task_id),
            authority: Authority::for_task(state, task_id),
        })
        .collect()
}
