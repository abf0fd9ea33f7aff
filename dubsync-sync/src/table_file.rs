//! File-backed [`TableStore`]: one JSON document per table.
//!
//! ```text
//! ~/.dubsync/datasets/<dataset>/<table>.json   ({"header": [...], "rows": [[...], ...]})
//! ~/.dubsync/hashes/datasets.json              (digest of each table's last write)
//! ```
//!
//! ## Write protocol
//!
//! 1. Apply the mutation to the freshly read table.
//! 2. Serialise and SHA-256 hash the result.
//! 3. Compare with the stored digest → skip if identical.
//! 4. Write to `<table>.json.tmp`.
//! 5. Rename to the final path (atomic on POSIX).
//! 6. Update and save the hash store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use dubsync_core::error::io_err as core_io_err;
use dubsync_core::{CoreError, DatasetId, Row, Table, TableName, TableRef, TableStore};

use crate::error::{io_err, SyncError};
use crate::hash_store::{self, HashStoreFile};

const HASH_SCOPE: &str = "datasets";

/// Outcome of one hash-gated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// Serialised content matches the stored hash; nothing touched.
    Unchanged { path: PathBuf },
}

/// `<home>/.dubsync/datasets/`
pub fn datasets_dir_at(home: &Path) -> PathBuf {
    home.join(".dubsync").join("datasets")
}

/// `<home>/.dubsync/datasets/<dataset>/<table>.json`
pub fn table_path_at(home: &Path, table: &TableRef) -> PathBuf {
    datasets_dir_at(home)
        .join(&table.dataset.0)
        .join(format!("{}.json", table.table.0))
}

pub struct FileTableStore {
    home: PathBuf,
    hashes: Mutex<HashStoreFile>,
}

impl FileTableStore {
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        Ok(Self {
            home: home.to_path_buf(),
            hashes: Mutex::new(hash_store::load_at(home, HASH_SCOPE)?),
        })
    }

    /// Create `table` with `header` unless it already exists. Returns whether
    /// a new table was created.
    pub fn create_table(&self, table: &TableRef, header: Vec<String>) -> Result<bool, SyncError> {
        let mut hashes = self.lock();
        if table_path_at(&self.home, table).exists() {
            return Ok(false);
        }
        self.write(&mut hashes, table, &Table::new(header))?;
        Ok(true)
    }

    /// Replace the whole contents of `table`.
    pub fn put_table(&self, table: &TableRef, contents: &Table) -> Result<WriteResult, SyncError> {
        let mut hashes = self.lock();
        self.write(&mut hashes, table, contents)
    }

    /// Tables present in `dataset`, sorted.
    pub fn list_tables(&self, dataset: &DatasetId) -> Result<Vec<TableName>, SyncError> {
        let dir = datasets_dir_at(&self.home).join(&dataset.0);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let path = entry.map_err(|e| io_err(&dir, e))?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(TableName::from(stem));
            }
        }
        names.sort();
        Ok(names)
    }

    fn lock(&self) -> MutexGuard<'_, HashStoreFile> {
        match self.hashes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self, table: &TableRef) -> Result<Table, CoreError> {
        let path = table_path_at(&self.home, table);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::UnknownTable(table.clone()))
            }
            Err(e) => return Err(core_io_err(&path, e)),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(
        &self,
        hashes: &mut HashStoreFile,
        table: &TableRef,
        contents: &Table,
    ) -> Result<WriteResult, SyncError> {
        let path = table_path_at(&self.home, table);
        let json = serde_json::to_string_pretty(contents)?;
        let digest = hash_store::digest(json.as_bytes());

        let key = format!("{}/{}", table.dataset, table.table);
        if hashes.files.get(&key) == Some(&digest) && path.exists() {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged { path });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }

        hashes.files.insert(key, digest);
        hashes.synced_at = Utc::now();
        hash_store::save_at(&self.home, HASH_SCOPE, hashes)?;
        tracing::debug!("wrote: {}", path.display());
        Ok(WriteResult::Written { path })
    }

    fn mutate(
        &self,
        table: &TableRef,
        f: impl FnOnce(&mut Table) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let mut hashes = self.lock();
        let mut contents = self.read(table)?;
        f(&mut contents)?;
        self.write(&mut hashes, table, &contents)
            .map(|_| ())
            .map_err(into_core)
    }
}

fn into_core(err: SyncError) -> CoreError {
    match err {
        SyncError::Core(e) => e,
        SyncError::Io { path, source } => CoreError::Storage { path, source },
        SyncError::Json(e) => CoreError::Json(e),
        other => CoreError::Io(std::io::Error::other(other.to_string())),
    }
}

fn check_range(table: &TableRef, len: usize, start: usize, count: usize) -> Result<(), CoreError> {
    if start + count > len {
        return Err(CoreError::RowOutOfRange {
            table: table.clone(),
            start,
            end: start + count,
            len,
        });
    }
    Ok(())
}

impl TableStore for FileTableStore {
    fn header(&self, table: &TableRef) -> Result<Vec<String>, CoreError> {
        Ok(self.read(table)?.header)
    }

    fn get_all_rows(&self, table: &TableRef) -> Result<Vec<Row>, CoreError> {
        Ok(self.read(table)?.rows)
    }

    fn get_row_range(
        &self,
        table: &TableRef,
        start: usize,
        count: usize,
    ) -> Result<Vec<Row>, CoreError> {
        Ok(self
            .read(table)?
            .rows
            .into_iter()
            .skip(start)
            .take(count)
            .collect())
    }

    fn append_row(&self, table: &TableRef, row: Row) -> Result<(), CoreError> {
        self.mutate(table, |t| {
            t.rows.push(row);
            Ok(())
        })
    }

    fn write_row_range(
        &self,
        table: &TableRef,
        start: usize,
        rows: Vec<Row>,
    ) -> Result<(), CoreError> {
        self.mutate(table, |t| {
            check_range(table, t.rows.len(), start, rows.len())?;
            for (offset, row) in rows.into_iter().enumerate() {
                t.rows[start + offset] = row;
            }
            Ok(())
        })
    }

    fn clear_row_range(&self, table: &TableRef, start: usize, count: usize) -> Result<(), CoreError> {
        self.mutate(table, |t| {
            check_range(table, t.rows.len(), start, count)?;
            for row in &mut t.rows[start..start + count] {
                row.clear();
            }
            Ok(())
        })
    }
}
