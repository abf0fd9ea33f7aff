//! dubsync core library: domain types, label registry, configuration,
//! storage seams and errors.
//!
//! - [`types`]: cells, rows, tables, dataset/table newtypes
//! - [`task`]: queued change tasks and their status machine
//! - [`label`]: per-column semantic labels and table schemas
//! - [`control`]: driver control record and scanner checkpoints
//! - [`registry`]: label registry persistence
//! - [`config`]: workspace configuration
//! - [`store`]: [`TableStore`] / [`PropertyStore`] traits
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod control;
pub mod error;
pub mod label;
pub mod registry;
pub mod store;
pub mod task;
pub mod types;

pub use config::{Config, ScanJob, ScanKind};
pub use control::{Checkpoint, ControlRecord};
pub use error::CoreError;
pub use label::{ColumnLabel, TableSchema};
pub use registry::LabelRegistry;
pub use store::{MemoryPropertyStore, MemoryTableStore, PropertyStore, TableStore};
pub use types::{
    Cell, DatasetId, EnvName, Row, StatusCode, Table, TableName, TableRef, Task, TaskAction,
};
