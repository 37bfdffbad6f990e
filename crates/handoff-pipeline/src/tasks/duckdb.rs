//! DuckDB load and export tasks.

use async_trait::async_trait;
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::result::{TaskOutput, TaskResult};
use crate::workflow::Task;

/// Arguments for loading a CSV file into a DuckDB table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadCsvArgs {
    /// Target table name.
    pub table_name: String,

    /// CSV file to read. The first row is a header.
    pub csv_path: PathBuf,

    /// DuckDB database file.
    pub duckdb_path: PathBuf,

    /// Column names to assign, in file order.
    pub names: Vec<String>,

    /// Schema the table is created in.
    pub duckdb_schema: String,

    /// Catalog name of the database (the file stem when opened by path).
    pub duckdb_database_name: String,
}

/// Arguments for exporting a DuckDB table to CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportCsvArgs {
    /// Source table name.
    pub table_name: String,

    /// CSV file to write, with a header row.
    pub csv_path: PathBuf,

    /// DuckDB database file.
    pub duckdb_path: PathBuf,

    /// Schema holding the table.
    pub duckdb_schema: String,

    /// Catalog name of the database.
    pub duckdb_database_name: String,
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified_table(database: &str, schema: &str, table: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(database),
        quote_ident(schema),
        quote_ident(table)
    )
}

fn open(path: &Path) -> Result<Connection, TaskError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Connection::open(path)
        .map_err(|e| TaskError::Database(format!("Failed to open {}: {}", path.display(), e)))
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64, TaskError> {
    let sql = format!("SELECT count(*) FROM {}", table);
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map_err(|e| TaskError::Database(format!("Failed to count rows in {}: {}", table, e)))
}

/// Replace a table with the contents of a CSV file. Returns the row count.
pub fn load_csv_to_duckdb(args: &LoadCsvArgs) -> Result<i64, TaskError> {
    if !args.csv_path.is_file() {
        return Err(TaskError::Configuration(format!(
            "CSV file not found: {}",
            args.csv_path.display()
        )));
    }
    if args.names.is_empty() {
        return Err(TaskError::Configuration(
            "At least one column name is required".to_string(),
        ));
    }

    let conn = open(&args.duckdb_path)?;
    let table = qualified_table(&args.duckdb_database_name, &args.duckdb_schema, &args.table_name);
    let names = args
        .names
        .iter()
        .map(|n| quote_literal(n))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "CREATE SCHEMA IF NOT EXISTS {db}.{schema};
         CREATE OR REPLACE TABLE {table} AS
         SELECT * FROM read_csv({csv}, header = true, names = [{names}]);",
        db = quote_ident(&args.duckdb_database_name),
        schema = quote_ident(&args.duckdb_schema),
        table = table,
        csv = quote_literal(&args.csv_path.to_string_lossy()),
        names = names,
    );
    conn.execute_batch(&sql)
        .map_err(|e| TaskError::Database(format!("Failed to load {}: {}", table, e)))?;

    count_rows(&conn, &table)
}

/// Write a table to CSV with a header row. Returns the row count.
pub fn export_duckdb_to_csv(args: &ExportCsvArgs) -> Result<i64, TaskError> {
    if !args.duckdb_path.is_file() {
        return Err(TaskError::Configuration(format!(
            "DuckDB database not found: {}",
            args.duckdb_path.display()
        )));
    }
    if let Some(parent) = args.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let conn = open(&args.duckdb_path)?;
    let table = qualified_table(&args.duckdb_database_name, &args.duckdb_schema, &args.table_name);
    let rows = count_rows(&conn, &table)?;

    let sql = format!(
        "COPY (SELECT * FROM {table}) TO {csv} (HEADER, DELIMITER ',');",
        table = table,
        csv = quote_literal(&args.csv_path.to_string_lossy()),
    );
    conn.execute_batch(&sql)
        .map_err(|e| TaskError::Database(format!("Failed to export {}: {}", table, e)))?;

    Ok(rows)
}

/// Task that loads a CSV file into DuckDB.
#[derive(Debug, Clone)]
pub struct LoadCsvToDuckDb {
    args: LoadCsvArgs,
}

impl LoadCsvToDuckDb {
    pub fn new(args: LoadCsvArgs) -> Self {
        Self { args }
    }
}

#[async_trait]
impl Task for LoadCsvToDuckDb {
    fn kind(&self) -> &'static str {
        "duckdb_load"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<TaskResult, TaskError> {
        let start = std::time::Instant::now();
        let args = self.args.clone();

        tracing::debug!(
            task = %ctx.task_id,
            csv = %args.csv_path.display(),
            table = %args.table_name,
            "Loading CSV into DuckDB"
        );

        let rows = tokio::task::spawn_blocking(move || load_csv_to_duckdb(&args)).await??;

        Ok(TaskResult::succeeded(TaskOutput::Loaded {
            table: format!("{}.{}", self.args.duckdb_schema, self.args.table_name),
            rows,
        })
        .with_duration(start.elapsed()))
    }
}

/// Task that exports a DuckDB table to CSV.
#[derive(Debug, Clone)]
pub struct ExportDuckDbToCsv {
    args: ExportCsvArgs,
}

impl ExportDuckDbToCsv {
    pub fn new(args: ExportCsvArgs) -> Self {
        Self { args }
    }
}

#[async_trait]
impl Task for ExportDuckDbToCsv {
    fn kind(&self) -> &'static str {
        "duckdb_export"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<TaskResult, TaskError> {
        let start = std::time::Instant::now();
        let args = self.args.clone();

        tracing::debug!(
            task = %ctx.task_id,
            table = %args.table_name,
            csv = %args.csv_path.display(),
            "Exporting DuckDB table to CSV"
        );

        let rows = tokio::task::spawn_blocking(move || export_duckdb_to_csv(&args)).await??;

        Ok(TaskResult::succeeded(TaskOutput::Exported {
            csv_path: self.args.csv_path.clone(),
            rows,
        })
        .with_duration(start.elapsed()))
    }
}
