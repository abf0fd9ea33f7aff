//! Named advisory locks backed by exclusively-created lock files.
//!
//! ```text
//! ~/.dubsync/run/locks/<name>.lock   (JSON LockMeta: mode 0600)
//! ```
//!
//! A lock lives exactly as long as its [`LockGuard`]. A lock file whose
//! `holdUntil` has passed belongs to a run that crashed or hung; acquiring
//! it fails with [`SyncError::StuckLock`] so an operator can investigate
//! and clear it with `dubsync unlock`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{io_err, SyncError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMeta {
    pub name: String,
    pub pid: u32,
    pub acquired_at: NaiveDateTime,
    pub hold_until: NaiveDateTime,
}

/// `<home>/.dubsync/run/locks/`
pub fn locks_dir_at(home: &Path) -> PathBuf {
    home.join(".dubsync").join("run").join("locks")
}

/// `<home>/.dubsync/run/locks/<name>.lock`; `:` and `/` in names become `-`.
pub fn lock_path_at(home: &Path, name: &str) -> PathBuf {
    let file: String = name
        .chars()
        .map(|c| if c == ':' || c == '/' || c == '\\' { '-' } else { c })
        .collect();
    locks_dir_at(home).join(format!("{file}.lock"))
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    meta: LockMeta,
    released: bool,
}

impl LockGuard {
    pub fn meta(&self) -> &LockMeta {
        &self.meta
    }

    pub fn release(mut self) -> Result<(), SyncError> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

pub struct AdvisoryLock;

impl AdvisoryLock {
    /// Try to take lock `name`, polling for up to `acquire_timeout`.
    ///
    /// `Ok(None)` when another live holder keeps it for the whole timeout.
    pub fn try_acquire(
        home: &Path,
        name: &str,
        clock: &dyn Clock,
        acquire_timeout: Duration,
        hold: Duration,
    ) -> Result<Option<LockGuard>, SyncError> {
        let dir = locks_dir_at(home);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = lock_path_at(home, name);
        let deadline = Instant::now() + acquire_timeout;

        loop {
            let now = clock.now();
            let meta = LockMeta {
                name: name.to_string(),
                pid: std::process::id(),
                acquired_at: now,
                hold_until: now
                    + chrono::Duration::from_std(hold)
                        .unwrap_or_else(|_| chrono::Duration::days(1)),
            };
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let json = serde_json::to_vec_pretty(&meta)?;
                    if let Err(e) = file.write_all(&json).and_then(|_| file.sync_all()) {
                        let _ = fs::remove_file(&path);
                        return Err(io_err(&path, e));
                    }
                    set_file_permissions(&path)?;
                    tracing::debug!("lock acquired: {name}");
                    return Ok(Some(LockGuard {
                        path,
                        meta,
                        released: false,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    // Unreadable meta means the holder is mid-write: treat as held.
                    if let Ok(Some(held)) = read_meta(&path) {
                        if held.hold_until < now {
                            return Err(SyncError::StuckLock {
                                name: name.to_string(),
                                pid: held.pid,
                                acquired_at: held.acquired_at,
                                hold_until: held.hold_until,
                            });
                        }
                    }
                }
                Err(e) => return Err(io_err(&path, e)),
            }

            if Instant::now() >= deadline {
                tracing::debug!("lock busy: {name}");
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Current holder of `name`, if any.
pub fn inspect_at(home: &Path, name: &str) -> Result<Option<LockMeta>, SyncError> {
    read_meta(&lock_path_at(home, name))
}

/// Every lock file currently present, sorted by name.
pub fn list_at(home: &Path) -> Result<Vec<LockMeta>, SyncError> {
    let dir = locks_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
        let path = entry.map_err(|e| io_err(&dir, e))?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("lock") {
            continue;
        }
        if let Some(meta) = read_meta(&path)? {
            out.push(meta);
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Remove lock `name` regardless of holder. Returns whether a lock existed.
pub fn force_release_at(home: &Path, name: &str) -> Result<bool, SyncError> {
    let path = lock_path_at(home, name);
    let existed = path.exists();
    remove_if_present(&path)?;
    if existed {
        tracing::warn!("lock force-released: {name}");
    }
    Ok(existed)
}

fn read_meta(path: &Path) -> Result<Option<LockMeta>, SyncError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn remove_if_present(path: &Path) -> Result<(), SyncError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn clock() -> ManualClock {
        ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 5, 4)
                .and_then(|d| d.and_hms_opt(9, 0, 0))
                .unwrap(),
        )
    }

    const HOLD: Duration = Duration::from_secs(600);

    #[test]
    fn second_acquire_is_busy_until_release() {
        let home = TempDir::new().unwrap();
        let clock = clock();
        let guard = AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD)
            .unwrap()
            .expect("first acquire");
        assert_eq!(guard.meta().pid, std::process::id());

        let second =
            AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD).unwrap();
        assert!(second.is_none());

        guard.release().unwrap();
        assert!(
            AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn drop_removes_lock_file() {
        let home = TempDir::new().unwrap();
        let clock = clock();
        {
            let _guard =
                AdvisoryLock::try_acquire(home.path(), "scan:health", &clock, Duration::ZERO, HOLD)
                    .unwrap()
                    .unwrap();
            assert!(lock_path_at(home.path(), "scan:health").exists());
        }
        assert!(!lock_path_at(home.path(), "scan:health").exists());
    }

    #[test]
    fn expired_hold_is_stuck() {
        let home = TempDir::new().unwrap();
        let clock = clock();
        let guard = AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD)
            .unwrap()
            .unwrap();
        clock.advance(chrono::Duration::minutes(11));
        let err = AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD)
            .unwrap_err();
        assert!(matches!(err, SyncError::StuckLock { .. }), "got: {err}");
        assert!(err.to_string().contains("dubsync unlock queue"));
        drop(guard);
    }

    #[test]
    fn force_release_clears_stuck_lock() {
        let home = TempDir::new().unwrap();
        let clock = clock();
        let guard = AdvisoryLock::try_acquire(home.path(), "queue", &clock, Duration::ZERO, HOLD)
            .unwrap()
            .unwrap();
        std::mem::forget(guard);
        assert_eq!(list_at(home.path()).unwrap().len(), 1);
        assert!(force_release_at(home.path(), "queue").unwrap());
        assert!(!force_release_at(home.path(), "queue").unwrap());
        assert!(inspect_at(home.path(), "queue").unwrap().is_none());
    }

    #[test]
    fn names_are_sanitised_for_the_filesystem() {
        let home = TempDir::new().unwrap();
        let path = lock_path_at(home.path(), "scan:duplicates");
        assert!(path.ends_with(".dubsync/run/locks/scan-duplicates.lock"));
    }
}
