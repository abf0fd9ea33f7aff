//! Workspace configuration: `~/.dubsync/config.yaml`.
//!
//! Describes where the queue, audit log and replicas live, how origin
//! environments map to source datasets, quotas and lock timings, scanner
//! jobs, and the user directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::registry::{ensure_dir, home, root_at, set_file_permissions};
use crate::types::{DatasetId, EnvName, TableName, TableRef};

/// Table name of the top-level aggregate in the production schema.
pub const DEFAULT_ROOT_TABLE: &str = "DWO";
/// Aggregate status that keeps a record in the active replica.
pub const DEFAULT_ACTIVE_STATUS: &str = "on track";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Change-task queue.
    pub queue: TableRef,
    /// Audit trail appended for every reconciled task.
    pub audit_log: TableRef,
    /// Replica receiving live records.
    pub active_dataset: DatasetId,
    /// Replica receiving records of completed aggregates.
    pub archive_dataset: DatasetId,
    /// Origin environment → source dataset.
    #[serde(default)]
    pub environments: BTreeMap<EnvName, DatasetId>,
    #[serde(default = "default_root_table")]
    pub root_table: TableName,
    #[serde(default = "default_active_status")]
    pub active_status: String,
    /// Depth of each table in the entity hierarchy (root = 0). Unlisted
    /// tables sit at depth 1.
    #[serde(default)]
    pub entity_depth: BTreeMap<TableName, u32>,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub scans: BTreeMap<String, ScanJob>,
    /// User identifier → display name.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wall-clock quota granted by the host for one run.
    pub quota_secs: u64,
    /// Read the clock once every N tasks.
    pub clock_check_every: usize,
    /// Delay before the next run after a quota-interrupted batch.
    pub resume_delay_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            quota_secs: 300,
            clock_check_every: 10,
            resume_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub acquire_timeout_secs: u64,
    /// Longest a healthy run may hold a lock.
    pub hold_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 5,
            hold_secs: 900,
        }
    }
}

/// What a checkpointed scanner looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Source rows newer than their witness are re-enqueued.
    Health,
    /// Rows sharing a key within one table are cleared, earliest kept.
    Duplicates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub kind: ScanKind,
    pub tables: Vec<TableName>,
    /// Dataset walked by a duplicates scan (defaults to the active replica).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetId>,
    /// Origin environment walked by a health scan (defaults to the first one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_env: Option<EnvName>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Larger chunks for large tables.
    #[serde(default)]
    pub chunk_overrides: BTreeMap<TableName, usize>,
    #[serde(default = "default_continuation_delay")]
    pub continuation_delay_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_secs: Option<u64>,
    /// Duplicates are counted but not cleared.
    #[serde(default)]
    pub report_only: bool,
}

impl ScanJob {
    pub fn new(kind: ScanKind, tables: Vec<TableName>) -> Self {
        Self {
            kind,
            tables,
            dataset: None,
            source_env: None,
            chunk_size: default_chunk_size(),
            chunk_overrides: BTreeMap::new(),
            continuation_delay_secs: default_continuation_delay(),
            quota_secs: None,
            report_only: false,
        }
    }

    pub fn chunk_size_for(&self, table: &TableName) -> usize {
        self.chunk_overrides
            .get(table)
            .copied()
            .unwrap_or(self.chunk_size)
            .max(1)
    }

    pub fn continuation_delay(&self) -> Duration {
        Duration::from_secs(self.continuation_delay_secs)
    }
}

fn default_root_table() -> TableName {
    TableName::from(DEFAULT_ROOT_TABLE)
}

fn default_active_status() -> String {
    DEFAULT_ACTIVE_STATUS.to_string()
}

fn default_chunk_size() -> usize {
    200
}

fn default_continuation_delay() -> u64 {
    60
}

impl Config {
    /// Scaffold written by `dubsync init`.
    pub fn scaffold() -> Self {
        let mut environments = BTreeMap::new();
        environments.insert(EnvName::from("prod"), DatasetId::from("prod"));

        let mut entity_depth = BTreeMap::new();
        entity_depth.insert(default_root_table(), 0);

        let mut scans = BTreeMap::new();
        scans.insert(
            "health".to_string(),
            ScanJob::new(ScanKind::Health, vec![default_root_table()]),
        );
        scans.insert(
            "duplicates".to_string(),
            ScanJob::new(ScanKind::Duplicates, vec![default_root_table()]),
        );

        Self {
            queue: TableRef::new("ops", "Queue"),
            audit_log: TableRef::new("ops", "Log"),
            active_dataset: DatasetId::from("live"),
            archive_dataset: DatasetId::from("archive"),
            environments,
            root_table: default_root_table(),
            active_status: default_active_status(),
            entity_depth,
            driver: DriverConfig::default(),
            lock: LockConfig::default(),
            scans,
            users: BTreeMap::new(),
        }
    }

    /// Depth of `table` in the entity hierarchy.
    pub fn depth_of(&self, table: &TableName) -> u32 {
        if let Some(depth) = self.entity_depth.get(table) {
            return *depth;
        }
        if *table == self.root_table {
            0
        } else {
            1
        }
    }

    pub fn source_dataset(&self, env: &EnvName) -> Option<&DatasetId> {
        self.environments.get(env)
    }

    pub fn quota(&self) -> Duration {
        Duration::from_secs(self.driver.quota_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.acquire_timeout_secs)
    }

    pub fn lock_hold(&self) -> Duration {
        Duration::from_secs(self.lock.hold_secs)
    }
}

/// `<home>/.dubsync/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

/// Load the configuration. `CoreError::NotFound` before `dubsync init`.
pub fn load_at(home: &Path) -> Result<Config, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(CoreError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, CoreError> {
    load_at(&home()?)
}

/// Atomically save the configuration (`.tmp` sibling → `chmod 0600` → rename).
pub fn save_at(home: &Path, config: &Config) -> Result<(), CoreError> {
    let root = root_at(home);
    ensure_dir(&root)?;
    let path = config_path_at(home);
    let tmp = path.with_file_name("config.yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(config)?)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
