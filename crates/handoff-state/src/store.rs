//! File-backed migration state store.
//!
//! Each legacy workflow has one document at
//! `<dags_dir>/migration_state/<workflow_id>.yaml`. Every write replaces the
//! whole file through a temp file and an atomic rename, so a reader sees
//! either the old document or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::{RetryPolicy, StoreConfig};
use crate::error::{StateError, StateResult};
use crate::result_ext::ResultExt;
use crate::scope::TemporaryState;
use crate::types::{validate_identifier, validate_task_id, MigrationState};

/// Subdirectory of the dags directory holding migration state documents.
pub const STATE_DIR: &str = "migration_state";

/// File extension of migration state documents.
pub const STATE_EXTENSION: &str = "yaml";

/// Reads and writes migration state documents under a dags directory.
#[derive(Debug, Clone)]
pub struct MigrationStateStore {
    dags_dir: PathBuf,
    retry: RetryPolicy,
}

impl MigrationStateStore {
    /// Create a store rooted at `dags_dir` with the default retry policy.
    pub fn new(dags_dir: impl Into<PathBuf>) -> Self {
        Self {
            dags_dir: dags_dir.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            dags_dir: config.dags_dir.clone(),
            retry: config.retry_policy(),
        }
    }

    /// Replace the retry policy used for permanent writes.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dags_dir(&self) -> &Path {
        &self.dags_dir
    }

    /// Path of the document for `workflow_id`.
    pub fn path_for(&self, workflow_id: &str) -> StateResult<PathBuf> {
        validate_identifier("workflow", workflow_id)?;
        Ok(self
            .dags_dir
            .join(STATE_DIR)
            .join(format!("{}.{}", workflow_id, STATE_EXTENSION)))
    }

    /// Whether a document exists for `workflow_id`.
    pub fn exists(&self, workflow_id: &str) -> StateResult<bool> {
        Ok(self.path_for(workflow_id)?.is_file())
    }

    /// Workflow ids that have a document, sorted.
    pub fn workflows(&self) -> StateResult<Vec<String>> {
        let dir = self.dags_dir.join(STATE_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StateError::Read { path: dir, source }),
        };

        let mut workflows = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StateError::Read {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_identifier("workflow", stem).is_ok() {
                    workflows.push(stem.to_string());
                }
            }
        }
        workflows.sort();
        Ok(workflows)
    }

    /// Raw document bytes for `workflow_id`.
    pub fn read_raw(&self, workflow_id: &str) -> StateResult<Vec<u8>> {
        let path = self.path_for(workflow_id)?;
        fs::read(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StateError::NotFound {
                    workflow: workflow_id.to_string(),
                    path,
                }
            } else {
                StateError::Read { path, source }
            }
        })
    }

    /// Read and parse the document for `workflow_id`.
    pub fn load(&self, workflow_id: &str) -> StateResult<MigrationState> {
        let path = self.path_for(workflow_id)?;
        let bytes = self.read_raw(workflow_id)?;
        let content =
            std::str::from_utf8(&bytes).map_err(|e| StateError::malformed(&path, e))?;
        let state = MigrationState::parse(content, &path)?;

        tracing::debug!(
            workflow = %workflow_id,
            tasks = state.len(),
            migrated = state.migrated_task_ids().len(),
            "Loaded migration state"
        );

        Ok(state)
    }

    /// Serialize `state` and overwrite the document for `workflow_id`.
    ///
    /// The previous content is gone once this returns.
    pub fn save(&self, workflow_id: &str, state: &MigrationState) -> StateResult<()> {
        state.validate()?;
        let path = self.path_for(workflow_id)?;
        let yaml = state
            .to_yaml()
            .map_err(|e| StateError::write(&path, std::io::Error::new(ErrorKind::InvalidData, e)))?;
        self.write_raw(workflow_id, yaml.as_bytes())?;

        tracing::info!(
            workflow = %workflow_id,
            path = %path.display(),
            migrated = ?state.migrated_task_ids(),
            "Saved migration state"
        );

        Ok(())
    }

    /// Save, retrying write failures according to `policy`.
    pub fn save_with_retry(
        &self,
        workflow_id: &str,
        state: &MigrationState,
        policy: &RetryPolicy,
    ) -> StateResult<()> {
        let mut attempt = 0;
        loop {
            match self.save(workflow_id, state) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_write() && attempt < policy.max_retries => {
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        workflow = %workflow_id,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Migration state write failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e).log(format!("saving migration state for {}", workflow_id)),
            }
        }
    }

    /// Overwrite the document with `bytes` exactly.
    pub fn write_raw(&self, workflow_id: &str, bytes: &[u8]) -> StateResult<()> {
        let path = self.path_for(workflow_id)?;
        write_atomic(&path, bytes).map_err(|source| StateError::write(&path, source))
    }

    /// Create the document for a newly instrumented workflow, every task legacy-owned.
    pub fn init<I, S>(&self, workflow_id: &str, task_ids: I) -> StateResult<MigrationState>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = self.path_for(workflow_id)?;
        if path.exists() {
            return Err(StateError::AlreadyExists {
                workflow: workflow_id.to_string(),
                path,
            });
        }
        let state = MigrationState::all_legacy(task_ids)?;
        self.save_with_retry(workflow_id, &state, &self.retry)?;
        Ok(state)
    }

    /// Permanently migrate (`true`) or roll back (`false`) one task.
    ///
    /// Returns the previous flag.
    pub fn set_migrated(
        &self,
        workflow_id: &str,
        task_id: &str,
        migrated: bool,
    ) -> StateResult<bool> {
        validate_task_id(task_id)?;
        let mut state = self.load(workflow_id)?;
        let listed = state.contains(task_id);
        let previous = state.set_migrated(task_id, migrated);
        if listed && previous == migrated {
            tracing::debug!(workflow = %workflow_id, task = %task_id, migrated, "Migration flag unchanged");
            return Ok(previous);
        }
        self.save_with_retry(workflow_id, &state, &self.retry)?;

        tracing::info!(
            workflow = %workflow_id,
            task = %task_id,
            from = previous,
            to = migrated,
            "Changed task migration flag"
        );

        Ok(previous)
    }

    /// Mark exactly `migrated` as migrated until the returned guard is dropped.
    pub fn temporary_state<I, S>(&self, workflow_id: &str, migrated: I) -> StateResult<TemporaryState>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TemporaryState::acquire(self.clone(), workflow_id, migrated)
    }

    /// Run `body` with exactly `migrated` marked as migrated, then restore the
    /// original document bytes.
    ///
    /// Restoration also happens if `body` panics.
    pub fn with_temporary_state<I, S, F, T>(
        &self,
        workflow_id: &str,
        migrated: I,
        body: F,
    ) -> StateResult<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&MigrationState) -> T,
    {
        let guard = self.temporary_state(workflow_id, migrated)?;
        let output = body(guard.state());
        guard.restore()?;
        Ok(output)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if let Ok(metadata) = fs::metadata(path) {
        tmp.as_file().set_permissions(metadata.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WORKFLOW: &str = "rebuild_customers_list";
    const TASKS: [&str; 3] = ["load_raw_customers", "build_dbt_models", "export_customers"];

    fn store() -> (TempDir, MigrationStateStore) {
        let dir = TempDir::new().unwrap();
        let store = MigrationStateStore::new(dir.path()).with_retry_policy(RetryPolicy::none());
        (dir, store)
    }

    #[test]
    fn test_path_for() {
        let store = MigrationStateStore::new("/opt/dags");
        assert_eq!(
            store.path_for(WORKFLOW).unwrap(),
            PathBuf::from("/opt/dags/migration_state/rebuild_customers_list.yaml")
        );
        assert!(matches!(
            store.path_for("../outside"),
            Err(StateError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_load_missing_document() {
        let (_dir, store) = store();
        assert!(matches!(store.load(WORKFLOW), Err(StateError::NotFound { .. })));
        assert!(!store.exists(WORKFLOW).unwrap());
    }

    #[test]
    fn test_load_malformed_document() {
        let (_dir, store) = store();
        store.write_raw(WORKFLOW, b"tasks: [oops").unwrap();
        assert!(matches!(store.load(WORKFLOW), Err(StateError::Malformed { .. })));
    }

    #[test]
    fn test_load_accepts_task_ids_outside_workflow_alphabet() {
        let (_dir, store) = store();
        store
            .write_raw(
                WORKFLOW,
                b"tasks:\n- id: _cleanup\n  migrated: false\n- id: build_dbt_models\n  migrated: true\n",
            )
            .unwrap();

        let state = store.load(WORKFLOW).unwrap();
        assert!(state.contains("_cleanup"));
        assert!(state.is_migrated("build_dbt_models"));

        assert!(!store.set_migrated(WORKFLOW, "_cleanup", true).unwrap());
        assert!(store.load(WORKFLOW).unwrap().is_migrated("_cleanup"));
        assert!(matches!(
            store.set_migrated(WORKFLOW, "", true),
            Err(StateError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_load_non_utf8_document() {
        let (_dir, store) = store();
        store.write_raw(WORKFLOW, &[0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(store.load(WORKFLOW), Err(StateError::Malformed { .. })));
    }

    #[test]
    fn test_init_then_load() {
        let (_dir, store) = store();
        let created = store.init(WORKFLOW, TASKS).unwrap();
        let loaded = store.load(WORKFLOW).unwrap();
        assert_eq!(created, loaded);
        assert!(loaded.migrated_task_ids().is_empty());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let (_dir, store) = store();
        store.init(WORKFLOW, TASKS).unwrap();
        store.set_migrated(WORKFLOW, "build_dbt_models", true).unwrap();

        let err = store.init(WORKFLOW, TASKS).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists { .. }));
        assert!(store.load(WORKFLOW).unwrap().is_migrated("build_dbt_models"));
    }

    #[test]
    fn test_save_overwrites() {
        let (_dir, store) = store();
        store.init(WORKFLOW, TASKS).unwrap();

        let state = MigrationState::explicit(TASKS, ["export_customers"]).unwrap();
        store.save(WORKFLOW, &state).unwrap();
        assert_eq!(store.load(WORKFLOW).unwrap(), state);
    }

    #[test]
    fn test_save_rejects_duplicates() {
        let (_dir, store) = store();
        let state = MigrationState {
            tasks: vec![
                crate::MigrationRecord::new("a", false),
                crate::MigrationRecord::new("a", true),
            ],
        };
        let err = store.save(WORKFLOW, &state).unwrap_err();
        assert!(matches!(err, StateError::DuplicateTask { ref task } if task == "a"));
        assert!(!store.exists(WORKFLOW).unwrap());
    }

    #[test]
    fn test_init_duplicate_tasks_is_input_error() {
        let (_dir, store) = store();
        let err = store.init(WORKFLOW, ["a", "a"]).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate task id 'a'");
        assert!(!store.exists(WORKFLOW).unwrap());
    }

    #[test]
    fn test_save_surfaces_write_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where the migration_state directory should be.
        fs::write(dir.path().join(STATE_DIR), b"not a directory").unwrap();
        let store = MigrationStateStore::new(dir.path());
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            ..RetryPolicy::default()
        };

        let state = MigrationState::all_legacy(TASKS).unwrap();
        let err = store.save_with_retry(WORKFLOW, &state, &policy).unwrap_err();
        assert!(err.is_write());
    }

    #[test]
    fn test_set_migrated_and_rollback() {
        let (_dir, store) = store();
        store.init(WORKFLOW, TASKS).unwrap();
        let before = store.read_raw(WORKFLOW).unwrap();

        assert!(!store.set_migrated(WORKFLOW, "build_dbt_models", true).unwrap());
        assert!(store.load(WORKFLOW).unwrap().is_migrated("build_dbt_models"));

        assert!(store.set_migrated(WORKFLOW, "build_dbt_models", false).unwrap());
        assert_eq!(store.read_raw(WORKFLOW).unwrap(), before);
    }

    #[test]
    fn test_set_migrated_lists_unknown_task() {
        let (_dir, store) = store();
        store.init(WORKFLOW, TASKS).unwrap();
        store.set_migrated(WORKFLOW, "new_task", false).unwrap();

        let state = store.load(WORKFLOW).unwrap();
        assert_eq!(state.len(), 4);
        assert!(state.contains("new_task"));
    }

    #[test]
    fn test_workflows_lists_documents() {
        let (dir, store) = store();
        store.init("b_flow", ["t"]).unwrap();
        store.init("a_flow", ["t"]).unwrap();
        fs::write(dir.path().join(STATE_DIR).join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.workflows().unwrap(), vec!["a_flow", "b_flow"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store.init(WORKFLOW, TASKS).unwrap();
        let path = store.path_for(WORKFLOW).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        store.set_migrated(WORKFLOW, "export_customers", true).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
