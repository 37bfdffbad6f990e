//! Handoff Pipeline
//!
//! Workflow tasks and a runner that executes them as either the legacy
//! scheduler or the new orchestrator, guided by the migration state.
//!
//! This crate provides:
//! - `Task` trait and ordered workflow definitions
//! - Built-in tasks: CSV load into DuckDB, DuckDB export to CSV, dbt build
//! - `WorkflowRunner` that runs only the tasks its role owns, once or polling
//! - The `rebuild_customers_list` tutorial workflow

pub mod context;
pub mod error;
pub mod result;
pub mod runner;
pub mod tasks;
pub mod tutorial;
pub mod workflow;

pub use context::ExecutionContext;
pub use error::TaskError;
pub use result::{TaskOutput, TaskResult, TaskStatus};
pub use runner::{RunReport, TaskOutcome, TaskReport, WorkflowRunner};
pub use tutorial::TutorialConfig;
pub use workflow::{Task, TaskDefinition, WorkflowDefinition};
