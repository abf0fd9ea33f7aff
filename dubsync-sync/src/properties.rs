//! File-backed [`PropertyStore`]: `~/.dubsync/properties.json`.
//!
//! A flat string → string JSON map, rewritten atomically on every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use dubsync_core::error::io_err;
use dubsync_core::{CoreError, PropertyStore};

/// `<home>/.dubsync/properties.json`
pub fn properties_path_at(home: &Path) -> PathBuf {
    home.join(".dubsync").join("properties.json")
}

pub struct FilePropertyStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FilePropertyStore {
    pub fn open_at(home: &Path) -> Self {
        Self {
            path: properties_path_at(home),
            guard: Mutex::new(()),
        }
    }

    /// Every property, sorted by key.
    pub fn all(&self) -> Result<BTreeMap<String, String>, CoreError> {
        let _guard = self.lock();
        self.load()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.guard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(values)?).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))
    }
}

impl PropertyStore for FilePropertyStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let _guard = self.lock();
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let _guard = self.lock();
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        let _guard = self.lock();
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn values_survive_reopen() {
        let home = TempDir::new().unwrap();
        FilePropertyStore::open_at(home.path())
            .set("control", r#"{"enabled":true}"#)
            .unwrap();
        let reopened = FilePropertyStore::open_at(home.path());
        assert_eq!(
            reopened.get("control").unwrap().as_deref(),
            Some(r#"{"enabled":true}"#)
        );
    }

    #[test]
    fn delete_missing_key_does_not_create_file() {
        let home = TempDir::new().unwrap();
        let props = FilePropertyStore::open_at(home.path());
        props.delete("checkpoint.health").unwrap();
        assert!(!properties_path_at(home.path()).exists());
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let home = TempDir::new().unwrap();
        let path = properties_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        let err = FilePropertyStore::open_at(home.path()).get("control").unwrap_err();
        assert!(matches!(err, CoreError::Json(_)));
    }
}
