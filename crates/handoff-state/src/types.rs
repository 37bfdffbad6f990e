//! Migration state document types.
//!
//! On disk a document looks like:
//!
//! ```yaml
//! tasks:
//! - id: load_raw_customers
//!   migrated: false
//! - id: build_dbt_models
//!   migrated: true
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::{StateError, StateResult};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("identifier pattern is valid")
});

/// Check that `value` is safe to use as a file name stem.
///
/// Applied to workflow ids, which name the document on disk. `..` and path
/// separators are rejected.
pub fn validate_identifier(kind: &'static str, value: &str) -> StateResult<()> {
    if IDENTIFIER.is_match(value) && !value.contains("..") {
        Ok(())
    } else {
        Err(StateError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

/// Check that `value` can be a task id. Task ids are only ever compared, so
/// any non-empty string is accepted.
pub fn validate_task_id(value: &str) -> StateResult<()> {
    if value.is_empty() {
        return Err(StateError::InvalidIdentifier {
            kind: "task",
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Migration flag for a single task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationRecord {
    /// Task identifier within the workflow.
    pub id: String,

    /// True when the new orchestrator owns the task.
    pub migrated: bool,
}

impl MigrationRecord {
    pub fn new(id: impl Into<String>, migrated: bool) -> Self {
        Self {
            id: id.into(),
            migrated,
        }
    }
}

/// Parsed contents of one workflow's migration state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    /// One record per task, in document order.
    pub tasks: Vec<MigrationRecord>,
}

impl MigrationState {
    /// Build a state from records, rejecting duplicate or empty ids.
    pub fn from_records(records: impl IntoIterator<Item = MigrationRecord>) -> StateResult<Self> {
        let state = Self {
            tasks: records.into_iter().collect(),
        };
        state.validate()?;
        Ok(state)
    }

    /// A state listing every task in `task_ids` as not migrated.
    pub fn all_legacy<I, S>(task_ids: I) -> StateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_records(task_ids.into_iter().map(|id| MigrationRecord::new(id, false)))
    }

    /// Explicit enumeration of `known` tasks with exactly `migrated` flagged.
    ///
    /// Ids in `migrated` that are not in `known` are appended, so every
    /// requested task ends up listed as migrated.
    pub fn explicit<'a, K, M>(known: K, migrated: M) -> StateResult<Self>
    where
        K: IntoIterator<Item = &'a str>,
        M: IntoIterator<Item = &'a str>,
    {
        let migrated: BTreeSet<&str> = migrated.into_iter().collect();
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for id in known {
            if seen.insert(id) {
                records.push(MigrationRecord::new(id, migrated.contains(id)));
            }
        }
        for id in migrated.iter().copied() {
            if seen.insert(id) {
                records.push(MigrationRecord::new(id, true));
            }
        }

        Self::from_records(records)
    }

    /// Parse and validate a document.
    ///
    /// `path` is used only for error reporting.
    pub fn parse(content: &str, path: &Path) -> StateResult<Self> {
        let state: MigrationState =
            serde_yaml::from_str(content).map_err(|e| StateError::malformed(path, e))?;
        state.validate().map_err(|e| match e {
            StateError::DuplicateTask { task } => {
                StateError::malformed(path, format!("duplicate task id '{}'", task))
            }
            StateError::InvalidIdentifier { .. } => StateError::malformed(path, "empty task id"),
            other => other,
        })?;
        Ok(state)
    }

    /// Serialize to the on-disk YAML form.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check that every task id is non-empty and listed once.
    pub fn validate(&self) -> StateResult<()> {
        let mut seen = HashSet::new();
        for record in &self.tasks {
            validate_task_id(&record.id)?;
            if !seen.insert(record.id.as_str()) {
                return Err(StateError::DuplicateTask {
                    task: record.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Stored flag for `task_id`; an absent task is not migrated.
    pub fn is_migrated(&self, task_id: &str) -> bool {
        self.get(task_id).map(|r| r.migrated).unwrap_or(false)
    }

    /// Record for `task_id`, if listed.
    pub fn get(&self, task_id: &str) -> Option<&MigrationRecord> {
        self.tasks.iter().find(|r| r.id == task_id)
    }

    /// Whether `task_id` has an explicit record.
    pub fn contains(&self, task_id: &str) -> bool {
        self.get(task_id).is_some()
    }

    /// Set the flag for `task_id`, appending a record if it is not listed.
    ///
    /// Returns the previous flag (`false` for a newly listed task).
    pub fn set_migrated(&mut self, task_id: &str, migrated: bool) -> bool {
        match self.tasks.iter_mut().find(|r| r.id == task_id) {
            Some(record) => std::mem::replace(&mut record.migrated, migrated),
            None => {
                self.tasks.push(MigrationRecord::new(task_id, migrated));
                false
            }
        }
    }

    /// Task ids in document order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|r| r.id.as_str())
    }

    /// Ids currently flagged as migrated.
    pub fn migrated_task_ids(&self) -> BTreeSet<&str> {
        self.tasks
            .iter()
            .filter(|r| r.migrated)
            .map(|r| r.id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("migration_state/rebuild_customers_list.yaml")
    }

    #[test]
    fn test_parse_document() {
        let yaml = r#"
tasks:
  - id: load_raw_customers
    migrated: false
  - id: build_dbt_models
    migrated: true
"#;
        let state = MigrationState::parse(yaml, path()).unwrap();
        assert_eq!(state.len(), 2);
        assert!(!state.is_migrated("load_raw_customers"));
        assert!(state.is_migrated("build_dbt_models"));
    }

    #[test]
    fn test_absent_task_is_not_migrated() {
        let state = MigrationState::all_legacy(["load_raw_customers"]).unwrap();
        assert!(!state.is_migrated("new_task"));
        assert!(!state.contains("new_task"));
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let yaml = r#"
tasks:
  - id: export_customers
    migrated: false
  - id: export_customers
    migrated: true
"#;
        let err = MigrationState::parse(yaml, path()).unwrap_err();
        assert!(matches!(err, StateError::Malformed { .. }));
        assert!(err.to_string().contains("duplicate task id 'export_customers'"));
        assert!(err.to_string().contains("rebuild_customers_list.yaml"));
    }

    #[test]
    fn test_parse_accepts_any_non_empty_task_id() {
        let yaml = r#"
tasks:
  - id: _cleanup
    migrated: false
  - id: load customers
    migrated: false
  - id: build_dbt_models
    migrated: true
"#;
        let state = MigrationState::parse(yaml, path()).unwrap();
        assert_eq!(
            state.task_ids().collect::<Vec<_>>(),
            vec!["_cleanup", "load customers", "build_dbt_models"]
        );
        assert!(state.is_migrated("build_dbt_models"));
    }

    #[test]
    fn test_parse_rejects_empty_task_id() {
        let yaml = "tasks:\n  - id: ''\n    migrated: false\n";
        let err = MigrationState::parse(yaml, path()).unwrap_err();
        assert!(matches!(err, StateError::Malformed { .. }));
        assert!(err.to_string().contains("empty task id"));
    }

    #[test]
    fn test_duplicate_input_is_not_a_document_error() {
        let err = MigrationState::all_legacy(["a", "a"]).unwrap_err();
        assert!(matches!(err, StateError::DuplicateTask { ref task } if task == "a"));
    }

    #[test]
    fn test_parse_rejects_missing_flag() {
        let yaml = "tasks:\n  - id: export_customers\n";
        let err = MigrationState::parse(yaml, path()).unwrap_err();
        assert!(matches!(err, StateError::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_non_bool_flag() {
        let yaml = "tasks:\n  - id: export_customers\n    migrated: maybe\n";
        assert!(MigrationState::parse(yaml, path()).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_record_keys() {
        let yaml = "tasks:\n  - id: export_customers\n    migrated: false\n    owner: ops\n";
        assert!(MigrationState::parse(yaml, path()).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        assert!(MigrationState::parse("", path()).is_err());
    }

    #[test]
    fn test_explicit_enumeration() {
        let known = ["load_raw_customers", "build_dbt_models", "export_customers"];
        let state = MigrationState::explicit(known, ["export_customers"]).unwrap();

        assert_eq!(
            state.task_ids().collect::<Vec<_>>(),
            vec!["load_raw_customers", "build_dbt_models", "export_customers"]
        );
        assert_eq!(
            state.migrated_task_ids().into_iter().collect::<Vec<_>>(),
            vec!["export_customers"]
        );
    }

    #[test]
    fn test_explicit_appends_unknown_migrated_ids() {
        let state = MigrationState::explicit(["a"], ["b"]).unwrap();
        assert_eq!(state.tasks, vec![
            MigrationRecord::new("a", false),
            MigrationRecord::new("b", true),
        ]);
    }

    #[test]
    fn test_set_migrated_returns_previous() {
        let mut state = MigrationState::all_legacy(["build_dbt_models"]).unwrap();
        assert!(!state.set_migrated("build_dbt_models", true));
        assert!(state.set_migrated("build_dbt_models", false));
        assert!(!state.set_migrated("new_task", true));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_yaml_round_trip_is_order_insensitive_equal() {
        let state = MigrationState::explicit(["a", "b", "c"], ["b"]).unwrap();
        let parsed = MigrationState::parse(&state.to_yaml().unwrap(), path()).unwrap();

        let original: HashSet<_> = state.tasks.into_iter().collect();
        let reparsed: HashSet<_> = parsed.tasks.into_iter().collect();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("workflow", "rebuild_customers_list").is_ok());
        assert!(validate_identifier("workflow", "group.flow-1").is_ok());
        assert!(validate_identifier("workflow", "../etc/passwd").is_err());
        assert!(validate_identifier("workflow", "a..b").is_err());
        assert!(validate_identifier("workflow", "").is_err());
        assert!(validate_identifier("workflow", "dir/name").is_err());
        assert!(validate_identifier("workflow", "has space").is_err());

        assert!(validate_task_id("_cleanup").is_ok());
        assert!(validate_task_id("load customers").is_ok());
        assert!(validate_task_id("").is_err());
    }
}
