use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use handoff_pipeline::{tutorial, RunReport, TaskOutcome, TutorialConfig, WorkflowRunner};
use handoff_state::{
    assignments, Assignment, Authority, MigrationStateStore, StateResult, StoreConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "handoff")]
#[command(version, about = "Move workflow tasks between orchestrators one at a time", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the legacy workflows and `migration_state/` (overrides HANDOFF_DAGS_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    dags_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration state document for a workflow, every task legacy-owned
    ///
    /// Examples:
    ///     handoff init rebuild_customers_list \
    ///         --task load_raw_customers --task build_dbt_models --task export_customers
    #[command(verbatim_doc_comment)]
    Init {
        /// Workflow identifier
        workflow: String,

        /// Task identifier (repeatable, in execution order)
        #[arg(long = "task", required = true, value_name = "TASK")]
        tasks: Vec<String>,
    },

    /// List workflows that have a migration state document
    List,

    /// Show each task's migration flag and execution authority
    Status {
        /// Workflow identifier
        workflow: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Hand a task over to the new orchestrator
    Migrate {
        /// Workflow identifier
        workflow: String,

        /// Task identifier
        task: String,
    },

    /// Give a task back to the legacy orchestrator
    Rollback {
        /// Workflow identifier
        workflow: String,

        /// Task identifier
        task: String,
    },

    /// Print which orchestrator runs a task: `legacy` or `orchestrator`
    Authority {
        /// Workflow identifier
        workflow: String,

        /// Task identifier
        task: String,
    },

    /// Run the rebuild_customers_list workflow as one orchestrator
    ///
    /// Only the tasks this orchestrator owns are executed; the rest are deferred.
    /// Tutorial paths come from HANDOFF_TUTORIAL_* environment variables.
    ///
    /// Examples:
    ///     handoff run                     # as the new orchestrator, once
    ///     handoff run --as legacy         # as the legacy scheduler
    ///     handoff run --watch 30 --json   # poll every 30 seconds until Ctrl+C
    #[command(verbatim_doc_comment)]
    Run {
        /// Orchestrator to act as: legacy or orchestrator
        #[arg(long = "as", default_value = "orchestrator", value_name = "ROLE")]
        role: Authority,

        /// Re-run every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,

        /// Print run reports as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct StatusView<'a> {
    workflow: &'a str,
    path: PathBuf,
    tasks: Vec<Assignment>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,handoff=debug,handoff_state=debug,handoff_pipeline=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run a store operation on the blocking pool; writes may sleep between retries.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> StateResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn store_config(dags_dir: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = StoreConfig::from_env().context("Invalid HANDOFF_* configuration")?;
    if let Some(dir) = dags_dir {
        config.dags_dir = dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = store_config(cli.dags_dir)?;
    let store = MigrationStateStore::from_config(&config);

    tracing::debug!(dags_dir = %config.dags_dir.display(), "Using migration state store");

    match cli.command {
        Commands::Init { workflow, tasks } => {
            let state = {
                let store = store.clone();
                let workflow = workflow.clone();
                blocking(move || store.init(&workflow, &tasks)).await?
            };
            println!(
                "Initialized {} with {} legacy task(s) at {}",
                workflow,
                state.len(),
                store.path_for(&workflow)?.display()
            );
        }
        Commands::List => {
            let workflows = {
                let store = store.clone();
                blocking(move || store.workflows()).await?
            };
            for workflow in workflows {
                println!("{}", workflow);
            }
        }
        Commands::Status { workflow, json } => {
            let state = store.load(&workflow)?;
            let view = StatusView {
                workflow: &workflow,
                path: store.path_for(&workflow)?,
                tasks: assignments(&state, state.task_ids()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_status(&view);
            }
        }
        Commands::Migrate { workflow, task } => {
            set_flag(&store, &workflow, &task, true).await?;
        }
        Commands::Rollback { workflow, task } => {
            set_flag(&store, &workflow, &task, false).await?;
        }
        Commands::Authority { workflow, task } => {
            let state = store.load(&workflow)?;
            if !state.contains(&task) {
                tracing::warn!(workflow = %workflow, task = %task, "Task not listed, defaulting to legacy");
            }
            println!("{}", Authority::for_task(&state, &task));
        }
        Commands::Run { role, watch, json } => {
            let tutorial_config = TutorialConfig::from_env()
                .context("Invalid HANDOFF_TUTORIAL_* configuration")?;
            let workflow = tutorial::rebuild_customers_list(&tutorial_config, &config.dags_dir)?;
            let runner = WorkflowRunner::new(store, workflow);

            match watch {
                Some(0) => bail!("--watch interval must be at least one second"),
                Some(secs) => {
                    let cycles = runner
                        .run_polling(role, Duration::from_secs(secs), shutdown_signal(), |report| {
                            print_report(report, json)
                        })
                        .await;
                    tracing::info!(cycles, "Stopped watching");
                }
                None => {
                    let report = runner.run(role).await?;
                    print_report(&report, json);
                    if !report.is_success() {
                        bail!("workflow {} failed as {}", report.workflow_id, report.role);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn set_flag(
    store: &MigrationStateStore,
    workflow: &str,
    task: &str,
    migrated: bool,
) -> Result<()> {
    let previous = {
        let (store, wf, id) = (store.clone(), workflow.to_string(), task.to_string());
        blocking(move || store.set_migrated(&wf, &id, migrated))
            .await
            .with_context(|| format!("Failed to update {}/{}", workflow, task))?
    };
    let now = if migrated { Authority::Orchestrator } else { Authority::Legacy };
    if previous == migrated {
        println!("{}/{} already runs on {}", workflow, task, now);
    } else {
        println!("{}/{} now runs on {}", workflow, task, now);
    }
    Ok(())
}

fn print_status(view: &StatusView<'_>) {
    println!("{} ({})", view.workflow, view.path.display());
    println!("{:<32} {:<9} {}", "TASK", "MIGRATED", "AUTHORITY");
    for assignment in &view.tasks {
        println!(
            "{:<32} {:<9} {}",
            assignment.task_id, assignment.migrated, assignment.authority
        );
    }
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!(error = %e, "Failed to serialize run report"),
        }
        return;
    }

    println!("run {} of {} as {}", report.run_id, report.workflow_id, report.role);
    for task in &report.tasks {
        let outcome = match &task.outcome {
            TaskOutcome::Ran { result } if result.is_success() => {
                match result.rows() {
                    Some(rows) => format!("ok, {} rows ({} ms)", rows, result.duration_ms),
                    None => format!("ok ({} ms)", result.duration_ms),
                }
            }
            TaskOutcome::Ran { result } => format!(
                "failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ),
            TaskOutcome::Deferred { to } => format!("deferred to {}", to),
            TaskOutcome::Blocked { after } => format!("blocked by {}", after),
        };
        println!("  {:<32} {}", task.task_id, outcome);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        }
    }
}
