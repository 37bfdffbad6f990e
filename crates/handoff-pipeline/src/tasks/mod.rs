//! Built-in task implementations.

mod dbt;
mod duckdb;

pub use self::dbt::{DbtArgs, DbtBuild};
pub use self::duckdb::{
    export_duckdb_to_csv, load_csv_to_duckdb, ExportCsvArgs, ExportDuckDbToCsv, LoadCsvArgs,
    LoadCsvToDuckDb,
};
