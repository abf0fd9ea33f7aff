//! Error types for dubsync-sync.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use dubsync_core::{CoreError, EnvName};
use dubsync_render::RenderError;

/// All errors that can arise from driver, scanner and store operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the core stores, registry or configuration.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from the change-log renderer.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lock held past its hold duration: a prior run is stuck or crashed.
    #[error("lock '{name}' held by pid {pid} since {acquired_at} (expected release by {hold_until}); run `dubsync unlock {name}` once that run is gone")]
    StuckLock {
        name: String,
        pid: u32,
        acquired_at: NaiveDateTime,
        hold_until: NaiveDateTime,
    },

    /// A control record or checkpoint property that cannot be decoded.
    #[error("property '{key}' is corrupt: {reason}")]
    CheckpointCorrupt { key: String, reason: String },

    /// A task names an origin environment with no configured source dataset.
    #[error("unknown origin environment '{0}'")]
    UnknownEnv(EnvName),

    /// No scanner job with this name in the configuration.
    #[error("unknown scan job '{0}'")]
    UnknownScan(String),

    /// A queue row number that does not hold a task.
    #[error("queue row {0} does not hold a task")]
    NoSuchTask(usize),

    /// A failure while processing one queued task, with its context.
    #[error("task {table}/{key} failed at {stage}: {source}")]
    Task {
        table: String,
        key: String,
        stage: &'static str,
        #[source]
        source: Box<SyncError>,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
