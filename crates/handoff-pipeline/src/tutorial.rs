//! The `rebuild_customers_list` tutorial workflow.
//!
//! Three tasks, in order: load `raw_customers.csv` into DuckDB, build the dbt
//! project, export the `customers` model back to `customers.csv`. The same
//! definition is handed to both orchestrators; the migration state decides
//! which one runs each task.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::TaskError;
use crate::tasks::{
    DbtArgs, DbtBuild, ExportCsvArgs, ExportDuckDbToCsv, LoadCsvArgs, LoadCsvToDuckDb,
};
use crate::workflow::WorkflowDefinition;

pub const WORKFLOW_ID: &str = "rebuild_customers_list";
pub const LOAD_RAW_CUSTOMERS: &str = "load_raw_customers";
pub const BUILD_DBT_MODELS: &str = "build_dbt_models";
pub const EXPORT_CUSTOMERS: &str = "export_customers";

/// Task ids of the tutorial workflow in execution order.
pub const TASK_IDS: [&str; 3] = [LOAD_RAW_CUSTOMERS, BUILD_DBT_MODELS, EXPORT_CUSTOMERS];

/// Tutorial configuration loaded from environment variables.
///
/// Environment variables are prefixed with `HANDOFF_TUTORIAL_`:
/// - `HANDOFF_TUTORIAL_HOME`: Directory holding the DuckDB file (default: ".handoff_home")
/// - `HANDOFF_TUTORIAL_DBT_PROJECT_DIR`: dbt project directory (required)
/// - `HANDOFF_TUTORIAL_DATABASE_NAME`: DuckDB catalog name (default: "jaffle_shop")
/// - `HANDOFF_TUTORIAL_SCHEMA`: Schema for loaded and exported tables (default: "raw_data")
/// - `HANDOFF_TUTORIAL_DBT_EXECUTABLE`: dbt binary (default: "dbt")
/// - `HANDOFF_TUTORIAL_DBT_TIMEOUT_SECONDS`: dbt timeout (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct TutorialConfig {
    /// Directory holding the DuckDB database file
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// dbt project directory
    pub dbt_project_dir: PathBuf,

    /// DuckDB catalog name; the database file is `<home>/<database_name>.duckdb`
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Schema for loaded and exported tables
    #[serde(default = "default_schema")]
    pub schema: String,

    /// dbt binary
    #[serde(default = "default_dbt_executable")]
    pub dbt_executable: String,

    /// dbt timeout in seconds
    #[serde(default)]
    pub dbt_timeout_seconds: Option<u64>,
}

fn default_home() -> PathBuf {
    PathBuf::from(".handoff_home")
}

fn default_database_name() -> String {
    "jaffle_shop".to_string()
}

fn default_schema() -> String {
    "raw_data".to_string()
}

fn default_dbt_executable() -> String {
    "dbt".to_string()
}

impl TutorialConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `HANDOFF_TUTORIAL_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("HANDOFF_TUTORIAL_").from_env::<TutorialConfig>()
    }

    /// Configuration with defaults for everything but the dbt project.
    pub fn new(dbt_project_dir: impl Into<PathBuf>) -> Self {
        Self {
            home: default_home(),
            dbt_project_dir: dbt_project_dir.into(),
            database_name: default_database_name(),
            schema: default_schema(),
            dbt_executable: default_dbt_executable(),
            dbt_timeout_seconds: None,
        }
    }

    /// Path of the DuckDB database file.
    pub fn duckdb_path(&self) -> PathBuf {
        self.home.join(format!("{}.duckdb", self.database_name))
    }
}

/// Build the tutorial workflow. CSV files live in `dags_dir`.
pub fn rebuild_customers_list(
    config: &TutorialConfig,
    dags_dir: &Path,
) -> Result<WorkflowDefinition, TaskError> {
    let load = LoadCsvToDuckDb::new(LoadCsvArgs {
        table_name: "raw_customers".to_string(),
        csv_path: dags_dir.join("raw_customers.csv"),
        duckdb_path: config.duckdb_path(),
        names: vec!["id".into(), "first_name".into(), "last_name".into()],
        duckdb_schema: config.schema.clone(),
        duckdb_database_name: config.database_name.clone(),
    });

    let mut dbt_args = DbtArgs::new(&config.dbt_project_dir);
    dbt_args.executable = config.dbt_executable.clone();
    dbt_args.timeout_seconds = config.dbt_timeout_seconds;
    dbt_args.env.insert(
        "HANDOFF_DUCKDB_PATH".to_string(),
        config.duckdb_path().display().to_string(),
    );
    let dbt = DbtBuild::new(dbt_args);

    let export = ExportDuckDbToCsv::new(ExportCsvArgs {
        table_name: "customers".to_string(),
        csv_path: dags_dir.join("customers.csv"),
        duckdb_path: config.duckdb_path(),
        duckdb_schema: config.schema.clone(),
        duckdb_database_name: config.database_name.clone(),
    });

    WorkflowDefinition::new(WORKFLOW_ID)?
        .with_task(LOAD_RAW_CUSTOMERS, &[], load)?
        .with_task(BUILD_DBT_MODELS, &[LOAD_RAW_CUSTOMERS], dbt)?
        .with_task(EXPORT_CUSTOMERS, &[BUILD_DBT_MODELS], export)
}
