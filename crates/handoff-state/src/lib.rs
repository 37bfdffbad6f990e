//! Handoff Migration State
//!
//! Per-task execution authority for a workflow that is being moved, one task
//! at a time, from a legacy scheduler to a new orchestrator.
//!
//! This crate provides:
//!
//! - **Migration state documents**: one YAML file per workflow listing every
//!   task and whether it has been migrated
//! - **Store**: load, save, initialise and toggle documents with atomic writes
//! - **Authority decision**: the single rule both orchestrators apply
//! - **Temporary state**: a guard that swaps in a state for a scope and always
//!   restores the original bytes
//!
//! ## Example
//!
//! ```no_run
//! use handoff_state::{Authority, MigrationStateStore};
//!
//! # fn main() -> Result<(), handoff_state::StateError> {
//! let store = MigrationStateStore::new("dags");
//! let state = store.load("rebuild_customers_list")?;
//! match Authority::for_task(&state, "build_dbt_models") {
//!     Authority::Legacy => println!("legacy scheduler runs it"),
//!     Authority::Orchestrator => println!("new orchestrator runs it"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod result_ext;
pub mod scope;
pub mod store;
pub mod types;

pub use authority::{assignments, Assignment, Authority};
pub use config::{RetryPolicy, StoreConfig};
pub use error::{StateError, StateResult};
pub use result_ext::ResultExt;
pub use scope::TemporaryState;
pub use store::{MigrationStateStore, STATE_DIR};
pub use types::{validate_identifier, validate_task_id, MigrationRecord, MigrationState};
