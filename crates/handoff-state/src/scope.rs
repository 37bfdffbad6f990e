//! Scoped temporary migration state.

use crate::error::{StateError, StateResult};
use crate::store::MigrationStateStore;
use crate::types::MigrationState;

/// Guard that holds a temporary migration state in place.
///
/// On acquisition the original document bytes are captured and a document
/// listing every known task is written, with exactly the requested tasks
/// migrated. The original bytes are written back when the guard is dropped,
/// whether the scope ended normally, through `?`, or by panic. Use
/// [`TemporaryState::restore`] to observe a restoration failure; `Drop` can
/// only log it.
#[derive(Debug)]
pub struct TemporaryState {
    store: MigrationStateStore,
    workflow_id: String,
    original: Vec<u8>,
    state: MigrationState,
    restored: bool,
}

impl TemporaryState {
    pub(crate) fn acquire<I, S>(
        store: MigrationStateStore,
        workflow_id: &str,
        migrated: I,
    ) -> StateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: Vec<String> = migrated.into_iter().map(|s| s.as_ref().to_string()).collect();

        let path = store.path_for(workflow_id)?;
        let original = store.read_raw(workflow_id)?;
        let content =
            std::str::from_utf8(&original).map_err(|e| StateError::malformed(&path, e))?;
        let current = MigrationState::parse(content, &path)?;
        let state =
            MigrationState::explicit(current.task_ids(), requested.iter().map(String::as_str))?;

        let guard = Self {
            store,
            workflow_id: workflow_id.to_string(),
            original,
            state,
            restored: false,
        };
        guard.store.save(&guard.workflow_id, &guard.state)?;

        tracing::debug!(
            workflow = %guard.workflow_id,
            migrated = ?requested,
            "Applied temporary migration state"
        );

        Ok(guard)
    }

    /// The state in effect while the guard is alive.
    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Write the original document back now and report the outcome.
    pub fn restore(mut self) -> StateResult<()> {
        self.restored = true;
        self.store.write_raw(&self.workflow_id, &self.original)?;
        tracing::debug!(workflow = %self.workflow_id, "Restored migration state");
        Ok(())
    }
}

impl Drop for TemporaryState {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.store.write_raw(&self.workflow_id, &self.original) {
            tracing::error!(
                workflow = %self.workflow_id,
                error = %e,
                "Failed to restore migration state"
            );
        }
    }
}
