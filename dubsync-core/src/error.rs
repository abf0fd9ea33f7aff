//! Error types for dubsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{StatusCode, TableRef};

/// All errors that can arise from registry, configuration and store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (properties, checkpoints, control record).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.dubsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// File-backed store I/O failure, annotated with the path.
    #[error("I/O error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required file did not exist at the expected path.
    #[error("not found at {path}")]
    NotFound { path: PathBuf },

    /// A label action code that does not map to any [`crate::label::ColumnLabel`].
    #[error("invalid column label '{code}'")]
    InvalidLabel { code: String },

    /// A table schema that violates a registry invariant (e.g. key column count).
    #[error("invalid schema for table '{table}': {reason}")]
    InvalidSchema { table: String, reason: String },

    /// The addressed table does not exist in the store.
    #[error("unknown table {0}")]
    UnknownTable(TableRef),

    /// A row range fell outside the table.
    #[error("row range {start}..{end} out of bounds for {table} ({len} rows)")]
    RowOutOfRange {
        table: TableRef,
        start: usize,
        end: usize,
        len: usize,
    },

    /// A queue row that cannot be read as a task.
    #[error("malformed task: {reason}")]
    MalformedTask { reason: String },

    /// A task status transition that the state machine forbids.
    #[error("illegal task transition from {from} via '{event}'")]
    IllegalTransition { from: StatusCode, event: &'static str },
}

/// Convenience constructor for [`CoreError::Storage`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Storage {
        path: path.into(),
        source,
    }
}
