//! Authority-aware workflow runner.
//!
//! A runner acts as one of the two orchestrators. For every run it reads the
//! migration state document fresh, then walks the workflow in declaration
//! order, executing only the tasks its role owns. If the document cannot be
//! read or parsed, no task runs.
//!
//! Once a task has executed, the document is read again before the next task
//! is decided, so a migration or rollback made while a run is in progress
//! applies to the tasks that have not started yet.

use chrono::{DateTime, Utc};
use handoff_state::{Authority, MigrationState, MigrationStateStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::result::TaskResult;
use crate::workflow::WorkflowDefinition;

/// What happened to one task during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The runner owned the task and executed it.
    Ran { result: TaskResult },
    /// The other orchestrator owns the task.
    Deferred { to: Authority },
    /// The runner owned the task but an earlier task in this run failed.
    Blocked { after: String },
}

/// Per-task entry in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub authority: Authority,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Summary of one workflow run under one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub role: Authority,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// True when no owned task failed or was blocked.
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| match &t.outcome {
            TaskOutcome::Ran { result } => result.is_success(),
            TaskOutcome::Deferred { .. } => true,
            TaskOutcome::Blocked { .. } => false,
        })
    }

    /// Ids of tasks this run executed.
    pub fn ran(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Ran { .. }))
            .map(|t| t.task_id.as_str())
            .collect()
    }

    /// Ids of tasks left to the other orchestrator.
    pub fn deferred(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Deferred { .. }))
            .map(|t| t.task_id.as_str())
            .collect()
    }
}

/// Runs a workflow as one orchestrator, deferring migrated-away tasks.
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    store: MigrationStateStore,
    workflow: Arc<WorkflowDefinition>,
}

impl WorkflowRunner {
    pub fn new(store: MigrationStateStore, workflow: WorkflowDefinition) -> Self {
        Self {
            store,
            workflow: Arc::new(workflow),
        }
    }

    /// Read the migration state for this workflow from disk.
    pub async fn load_state(&self) -> Result<MigrationState, TaskError> {
        let store = self.store.clone();
        let workflow_id = self.workflow.id().to_string();
        let state = tokio::task::spawn_blocking(move || store.load(&workflow_id)).await??;
        Ok(state)
    }

    /// Run every task owned by `role` once.
    pub async fn run(&self, role: Authority) -> Result<RunReport, TaskError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let workflow_id = self.workflow.id();

        let mut state = self.load_state().await.map_err(|e| {
            tracing::error!(
                workflow = %workflow_id,
                role = %role,
                error = %e,
                "Cannot resolve execution authority, refusing to run any task"
            );
            e
        })?;

        for task_id in self.workflow.task_ids().filter(|id| !state.contains(id)) {
            tracing::warn!(
                workflow = %workflow_id,
                task = %task_id,
                "Task missing from migration state, treating as legacy-owned"
            );
        }

        tracing::info!(
            run_id = %run_id,
            workflow = %workflow_id,
            role = %role,
            migrated = ?state.migrated_task_ids(),
            "Starting workflow run"
        );

        let mut tasks = Vec::with_capacity(self.workflow.tasks().len());
        let mut failed: Option<String> = None;
        let mut state_is_fresh = true;

        for def in self.workflow.tasks() {
            if !state_is_fresh && failed.is_none() {
                match self.load_state().await {
                    Ok(reloaded) => {
                        state = reloaded;
                        state_is_fresh = true;
                    }
                    Err(e) => {
                        tracing::error!(
                            workflow = %workflow_id,
                            task = %def.id,
                            error = %e,
                            "Cannot re-check execution authority, stopping run"
                        );
                        failed = Some(def.id.clone());
                        tasks.push(TaskReport {
                            task_id: def.id.clone(),
                            authority: role,
                            outcome: TaskOutcome::Ran {
                                result: TaskResult::failed(e.to_string()),
                            },
                        });
                        continue;
                    }
                }
            }

            let authority = Authority::for_task(&state, &def.id);

            let outcome = if !authority.claims(role) {
                tracing::debug!(task = %def.id, owner = %authority, "Deferring task");
                TaskOutcome::Deferred { to: authority }
            } else if let Some(ref after) = failed {
                tracing::warn!(task = %def.id, after = %after, "Skipping task after failure");
                TaskOutcome::Blocked {
                    after: after.clone(),
                }
            } else {
                state_is_fresh = false;
                let ctx = ExecutionContext::new(run_id, workflow_id, &def.id, role);
                let result = match def.body.run(&ctx).await {
                    Ok(result) => result,
                    Err(e) => TaskResult::failed(e.to_string()),
                };

                if result.is_success() {
                    tracing::info!(
                        task = %def.id,
                        kind = def.body.kind(),
                        duration_ms = result.duration_ms,
                        "Task succeeded"
                    );
                } else {
                    tracing::error!(
                        task = %def.id,
                        kind = def.body.kind(),
                        status = %result.status,
                        error = ?result.error,
                        "Task failed"
                    );
                    failed = Some(def.id.clone());
                }
                TaskOutcome::Ran { result }
            };

            tasks.push(TaskReport {
                task_id: def.id.clone(),
                authority,
                outcome,
            });
        }

        let report = RunReport {
            run_id,
            workflow_id: workflow_id.to_string(),
            role,
            started_at,
            finished_at: Utc::now(),
            tasks,
        };

        tracing::info!(
            run_id = %run_id,
            ran = ?report.ran(),
            deferred = ?report.deferred(),
            success = report.is_success(),
            "Workflow run finished"
        );

        Ok(report)
    }

    /// Run once per `interval` until `shutdown` resolves.
    ///
    /// The document is re-read every cycle, so migration changes take effect on
    /// the next cycle. A cycle that cannot resolve authority runs nothing and
    /// is logged; polling continues. `on_report` sees each completed run.
    /// Returns the number of cycles that produced a report.
    pub async fn run_polling<F, R>(
        &self,
        role: Authority,
        interval: Duration,
        shutdown: F,
        mut on_report: R,
    ) -> usize
    where
        F: Future<Output = ()>,
        R: FnMut(&RunReport),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(role = %role, cycles, "Polling stopped");
                    return cycles;
                }
                _ = ticker.tick() => {
                    match self.run(role).await {
                        Ok(report) => {
                            cycles += 1;
                            on_report(&report);
                        }
                        Err(e) => {
                            tracing::error!(role = %role, error = %e, "Polling cycle ran no tasks");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TaskOutput;
    use crate::workflow::Task;
    use async_trait::async_trait;
    use handoff_state::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const WORKFLOW: &str = "rebuild_customers_list";
    const TASKS: [&str; 3] = ["load_raw_customers", "build_dbt_models", "export_customers"];

    #[derive(Clone, Default)]
    struct CountingTask {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _ctx: &ExecutionContext) -> Result<TaskResult, TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TaskError::Execution("boom".to_string()))
            } else {
                Ok(TaskResult::succeeded(TaskOutput::None))
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: MigrationStateStore,
        counters: Vec<Arc<AtomicUsize>>,
        runner: WorkflowRunner,
    }

    fn fixture(failing: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = MigrationStateStore::new(dir.path()).with_retry_policy(RetryPolicy::none());
        store.init(WORKFLOW, TASKS).unwrap();

        let mut workflow = WorkflowDefinition::new(WORKFLOW).unwrap();
        let mut counters = Vec::new();
        let mut previous: Option<&str> = None;
        for id in TASKS {
            let task = CountingTask {
                runs: Arc::new(AtomicUsize::new(0)),
                fail: failing == Some(id),
            };
            counters.push(task.runs.clone());
            let deps: Vec<&str> = previous.into_iter().collect();
            workflow.add_task(id, &deps, task).unwrap();
            previous = Some(id);
        }

        Fixture {
            _dir: dir,
            runner: WorkflowRunner::new(store.clone(), workflow),
            store,
            counters,
        }
    }

    fn runs(f: &Fixture) -> Vec<usize> {
        f.counters.iter().map(|c| c.load(Ordering::SeqCst)).collect()
    }

    #[tokio::test]
    async fn test_legacy_runs_everything_when_nothing_migrated() {
        let f = fixture(None);

        let report = f.runner.run(Authority::Legacy).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.ran(), TASKS.to_vec());
        assert_eq!(runs(&f), vec![1, 1, 1]);

        let report = f.runner.run(Authority::Orchestrator).await.unwrap();
        assert!(report.ran().is_empty());
        assert_eq!(report.deferred(), TASKS.to_vec());
        assert_eq!(runs(&f), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_each_task_runs_exactly_once_across_roles() {
        let f = fixture(None);
        f.store.set_migrated(WORKFLOW, "build_dbt_models", true).unwrap();

        let legacy = f.runner.run(Authority::Legacy).await.unwrap();
        let orchestrator = f.runner.run(Authority::Orchestrator).await.unwrap();

        assert_eq!(legacy.ran(), vec!["load_raw_customers", "export_customers"]);
        assert_eq!(orchestrator.ran(), vec!["build_dbt_models"]);
        assert_eq!(runs(&f), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_temporary_state_drives_runner() {
        let f = fixture(None);

        {
            let _guard = f.store.temporary_state(WORKFLOW, ["export_customers"]).unwrap();
            let report = f.runner.run(Authority::Orchestrator).await.unwrap();
            assert_eq!(report.ran(), vec!["export_customers"]);
        }

        let report = f.runner.run(Authority::Orchestrator).await.unwrap();
        assert!(report.ran().is_empty());
    }

    #[tokio::test]
    async fn test_missing_state_runs_nothing() {
        let f = fixture(None);
        std::fs::remove_file(f.store.path_for(WORKFLOW).unwrap()).unwrap();

        let err = f.runner.run(Authority::Legacy).await.unwrap_err();
        assert!(matches!(err, TaskError::State(handoff_state::StateError::NotFound { .. })));
        assert_eq!(runs(&f), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_corrupt_state_runs_nothing() {
        let f = fixture(None);
        f.store.write_raw(WORKFLOW, b"tasks: {not: a list}").unwrap();

        assert!(f.runner.run(Authority::Orchestrator).await.is_err());
        assert!(f.runner.run(Authority::Legacy).await.is_err());
        assert_eq!(runs(&f), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_failure_blocks_remaining_owned_tasks() {
        let f = fixture(Some("load_raw_customers"));

        let report = f.runner.run(Authority::Legacy).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(runs(&f), vec![1, 0, 0]);
        assert_eq!(
            report.tasks[2].outcome,
            TaskOutcome::Blocked {
                after: "load_raw_customers".to_string()
            }
        );
    }

    /// Migrates `target` while it runs, like an operator acting mid-run.
    struct MigratingTask {
        store: MigrationStateStore,
        target: &'static str,
    }

    #[async_trait]
    impl Task for MigratingTask {
        fn kind(&self) -> &'static str {
            "migrating"
        }

        async fn run(&self, _ctx: &ExecutionContext) -> Result<TaskResult, TaskError> {
            self.store.set_migrated(WORKFLOW, self.target, true)?;
            Ok(TaskResult::succeeded(TaskOutput::None))
        }
    }

    #[tokio::test]
    async fn test_migration_during_run_applies_to_later_tasks() {
        let dir = TempDir::new().unwrap();
        let store = MigrationStateStore::new(dir.path()).with_retry_policy(RetryPolicy::none());
        store.init(WORKFLOW, TASKS).unwrap();

        let export = CountingTask::default();
        let export_runs = export.runs.clone();
        let workflow = WorkflowDefinition::new(WORKFLOW)
            .unwrap()
            .with_task(
                "load_raw_customers",
                &[],
                MigratingTask {
                    store: store.clone(),
                    target: "export_customers",
                },
            )
            .unwrap()
            .with_task("build_dbt_models", &["load_raw_customers"], CountingTask::default())
            .unwrap()
            .with_task("export_customers", &["build_dbt_models"], export)
            .unwrap();
        let runner = WorkflowRunner::new(store, workflow);

        let legacy = runner.run(Authority::Legacy).await.unwrap();
        assert_eq!(legacy.ran(), vec!["load_raw_customers", "build_dbt_models"]);
        assert_eq!(legacy.deferred(), vec!["export_customers"]);

        let orchestrator = runner.run(Authority::Orchestrator).await.unwrap();
        assert_eq!(orchestrator.ran(), vec!["export_customers"]);
        assert_eq!(export_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_report_serializes_outcome_tag() {
        let f = fixture(None);
        f.store.set_migrated(WORKFLOW, "export_customers", true).unwrap();

        let report = f.runner.run(Authority::Legacy).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["role"], "legacy");
        assert_eq!(json["tasks"][2]["outcome"], "deferred");
        assert_eq!(json["tasks"][2]["to"], "orchestrator");
    }

    #[tokio::test]
    async fn test_polling_picks_up_changes() {
        let f = fixture(None);
        let store = f.store.clone();
        let mut reports = Vec::new();

        let cycles = f
            .runner
            .run_polling(
                Authority::Orchestrator,
                Duration::from_millis(20),
                tokio::time::sleep(Duration::from_millis(200)),
                |report| {
                    reports.push(report.ran().len());
                    if reports.len() == 1 {
                        store.set_migrated(WORKFLOW, "build_dbt_models", true).unwrap();
                    }
                },
            )
            .await;

        assert!(cycles >= 2);
        assert_eq!(reports[0], 0);
        assert_eq!(reports[1], 1);
    }
}
