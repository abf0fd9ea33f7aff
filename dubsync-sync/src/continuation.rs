//! One-shot continuations: "invoke handler X again in N seconds".
//!
//! Scanners register one before returning on quota exhaustion; the daemon
//! (or `dubsync daemon run`) fires due entries. Persisted at
//! `~/.dubsync/run/continuations.json`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub id: u64,
    pub handler: String,
    pub due_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// Host timer facility.
pub trait ContinuationScheduler: Send + Sync {
    fn schedule_once(&self, handler: &str, delay: Duration) -> Result<Continuation, SyncError>;

    /// Remove every pending entry for `handler`. Returns how many were removed.
    fn cancel_all(&self, handler: &str) -> Result<usize, SyncError>;

    /// Pending entries ordered by due time.
    fn pending(&self) -> Result<Vec<Continuation>, SyncError>;

    /// Remove and return entries due at or before `now`.
    fn take_due(&self, now: NaiveDateTime) -> Result<Vec<Continuation>, SyncError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContinuationFile {
    next_id: u64,
    entries: Vec<Continuation>,
}

/// `<home>/.dubsync/run/continuations.json`
pub fn continuations_path_at(home: &Path) -> PathBuf {
    home.join(".dubsync").join("run").join("continuations.json")
}

pub struct FileContinuations {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    guard: Mutex<()>,
}

impl FileContinuations {
    pub fn open_at(home: &Path, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: continuations_path_at(home),
            clock,
            guard: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.guard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load(&self) -> Result<ContinuationFile, SyncError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ContinuationFile::default()),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }

    fn save(&self, file: &ContinuationFile) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))
    }
}

impl ContinuationScheduler for FileContinuations {
    fn schedule_once(&self, handler: &str, delay: Duration) -> Result<Continuation, SyncError> {
        let _guard = self.lock();
        let mut file = self.load()?;
        let now = self.clock.now();
        file.next_id += 1;
        let entry = Continuation {
            id: file.next_id,
            handler: handler.to_string(),
            due_at: now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1)),
            created_at: now,
        };
        file.entries.push(entry.clone());
        self.save(&file)?;
        tracing::info!("continuation scheduled: {handler} at {}", entry.due_at);
        Ok(entry)
    }

    fn cancel_all(&self, handler: &str) -> Result<usize, SyncError> {
        let _guard = self.lock();
        let mut file = self.load()?;
        let before = file.entries.len();
        file.entries.retain(|e| e.handler != handler);
        let removed = before - file.entries.len();
        if removed > 0 {
            self.save(&file)?;
        }
        Ok(removed)
    }

    fn pending(&self) -> Result<Vec<Continuation>, SyncError> {
        let _guard = self.lock();
        let mut entries = self.load()?.entries;
        entries.sort_by_key(|e| (e.due_at, e.id));
        Ok(entries)
    }

    fn take_due(&self, now: NaiveDateTime) -> Result<Vec<Continuation>, SyncError> {
        let _guard = self.lock();
        let mut file = self.load()?;
        let (mut due, rest): (Vec<_>, Vec<_>) =
            file.entries.into_iter().partition(|e| e.due_at <= now);
        file.entries = rest;
        if !due.is_empty() {
            self.save(&file)?;
        }
        due.sort_by_key(|e| (e.due_at, e.id));
        Ok(due)
    }
}
