//! Label registry: one YAML schema per table.
//!
//! # Storage layout
//!
//! ```text
//! ~/.dubsync/
//!   labels/
//!     <table>.yaml   (one TableSchema per table: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every persistence function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::label::TableSchema;
use crate::types::TableName;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.dubsync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".dubsync")
}

/// `<home>/.dubsync/labels/`
pub fn labels_dir_at(home: &Path) -> PathBuf {
    root_at(home).join("labels")
}

/// `<home>/.dubsync/labels/<table>.yaml`: pure, no I/O.
pub fn schema_path_at(home: &Path, table: &TableName) -> PathBuf {
    labels_dir_at(home).join(format!("{}.yaml", table.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the schema for `table`.
///
/// Returns `CoreError::NotFound` if absent, `CoreError::Parse` (with path +
/// line context) if malformed YAML, `CoreError::InvalidSchema` if the labels
/// break the single-key invariant.
pub fn load_schema_at(home: &Path, table: &TableName) -> Result<TableSchema, CoreError> {
    let path = schema_path_at(home, table);
    if !path.exists() {
        return Err(CoreError::NotFound { path });
    }
    read_schema(&path)
}

/// `load_schema_at` convenience wrapper.
pub fn load_schema(table: &TableName) -> Result<TableSchema, CoreError> {
    load_schema_at(&home()?, table)
}

/// Load every schema under `<home>/.dubsync/labels/`, sorted by table name.
pub fn list_schemas_at(home: &Path) -> Result<Vec<TableSchema>, CoreError> {
    let dir = labels_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut schemas = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        schemas.push(read_schema(&entry.path())?);
    }
    Ok(schemas)
}

fn read_schema(path: &Path) -> Result<TableSchema, CoreError> {
    let contents = std::fs::read_to_string(path)?;
    let schema: TableSchema = serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    schema.validate()?;
    Ok(schema)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Validate and atomically save a schema.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_schema_at(home: &Path, schema: &TableSchema) -> Result<(), CoreError> {
    schema.validate()?;
    let dir = labels_dir_at(home);
    ensure_dir(&dir)?;
    let path = schema_path_at(home, &schema.table);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", schema.table.0));

    let yaml = serde_yaml::to_string(schema)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_schema_at` convenience wrapper.
pub fn save_schema(schema: &TableSchema) -> Result<(), CoreError> {
    save_schema_at(&home()?, schema)
}

// ---------------------------------------------------------------------------
// 4. Run-scoped registry
// ---------------------------------------------------------------------------

/// All table schemas, loaded once at the start of a run and immutable for
/// its duration.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    schemas: HashMap<TableName, TableSchema>,
}

impl LabelRegistry {
    pub fn load_at(home: &Path) -> Result<Self, CoreError> {
        Ok(Self::from_schemas(list_schemas_at(home)?))
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|s| (s.table.clone(), s))
                .collect(),
        }
    }

    /// Schema for `table`, if registered.
    pub fn get(&self, table: &TableName) -> Option<&TableSchema> {
        self.schemas.get(table)
    }

    pub fn tables(&self) -> Vec<&TableName> {
        let mut names: Vec<_> = self.schemas.keys().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

/// Create `dir` (mode `0700`) if it does not yet exist.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), CoreError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::ColumnLabel;
    use tempfile::TempDir;

    fn schema(table: &str) -> TableSchema {
        TableSchema {
            labels: vec![ColumnLabel::Key, ColumnLabel::PlainDiff, ColumnLabel::Comment],
            log_history_column: Some(3),
            ..TableSchema::fallback(table)
        }
    }

    #[test]
    fn schema_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        let path = schema_path_at(home.path(), &TableName::from("Role"));
        assert!(path.ends_with(".dubsync/labels/Role.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        save_schema_at(home.path(), &schema("Role")).expect("save");
        let loaded = load_schema_at(home.path(), &TableName::from("Role")).expect("load");
        assert_eq!(loaded, schema("Role"));
    }

    #[test]
    fn save_rejects_invalid_schema() {
        let home = TempDir::new().expect("tempdir");
        let err = save_schema_at(home.path(), &TableSchema::fallback("Role")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { .. }));
        assert!(!schema_path_at(home.path(), &TableName::from("Role")).exists());
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        save_schema_at(home.path(), &schema("Role")).expect("save");
        let tmp = schema_path_at(home.path(), &TableName::from("Role"))
            .with_file_name("Role.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_schema_returns_not_found() {
        let home = TempDir::new().expect("tempdir");
        let err = load_schema_at(home.path(), &TableName::from("Role")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn registry_loads_every_schema_once() {
        let home = TempDir::new().expect("tempdir");
        save_schema_at(home.path(), &schema("Role")).expect("save");
        save_schema_at(home.path(), &schema("DWO")).expect("save");
        let registry = LabelRegistry::load_at(home.path()).expect("registry");
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.tables(),
            vec![&TableName::from("DWO"), &TableName::from("Role")]
        );
        assert!(registry.get(&TableName::from("Missing")).is_none());
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(CoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
