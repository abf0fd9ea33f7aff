//! Hash store: SHA-256 digests of the last content written per file.
//!
//! Persists a `HashStoreFile` JSON document at
//! `<home>/.dubsync/hashes/<scope>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// In-memory hash store: maps file path strings to their last written
/// SHA-256 hex digest.
pub type HashStore = HashMap<String, String>;

/// On-disk hash store payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashStoreFile {
    pub synced_at: DateTime<Utc>,
    #[serde(default)]
    pub files: HashStore,
}

/// `~/.dubsync/hashes/<scope>.json`
pub fn store_path_at(home: &Path, scope: &str) -> PathBuf {
    home.join(".dubsync")
        .join("hashes")
        .join(format!("{scope}.json"))
}

/// Hex SHA-256 of `content`.
pub fn digest(content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    hex::encode(h.finalize())
}

/// Load the hash store for `scope`; empty if the file does not yet exist.
pub fn load_at(home: &Path, scope: &str) -> Result<HashStoreFile, SyncError> {
    let path = store_path_at(home, scope);
    if !path.exists() {
        return Ok(HashStoreFile {
            synced_at: Utc::now(),
            files: HashMap::new(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the hash store for `scope` atomically.
pub fn save_at(home: &Path, scope: &str, store: &HashStoreFile) -> Result<(), SyncError> {
    let path = store_path_at(home, scope);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid hash store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(tmp.path(), "datasets").unwrap();
        assert!(store.files.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut files = HashMap::new();
        files.insert("live/DWO.json".to_string(), digest(b"[]"));
        let store = HashStoreFile {
            synced_at: Utc::now(),
            files,
        };

        save_at(tmp.path(), "datasets", &store).unwrap();
        let loaded = load_at(tmp.path(), "datasets").unwrap();
        assert_eq!(loaded.files, store.files);
        assert!(!store_path_at(tmp.path(), "datasets")
            .with_extension("json.tmp")
            .exists());
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
