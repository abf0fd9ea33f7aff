//! Shared entrypoints used by the CLI and the daemon.
//!
//! Each `*_at(home, …)` opens the file-backed workspace under
//! `<home>/.dubsync/`, runs one operation and returns a serialisable report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use dubsync_core::task::QUEUE_HEADER;
use dubsync_core::{
    config, registry, Checkpoint, Config, ControlRecord, EnvName, StatusCode, TableName,
    TableRef, Task, TaskAction,
};

use crate::audit::AUDIT_HEADER;
use crate::checkpoint::{load_checkpoint, load_control};
use crate::continuation::Continuation;
use crate::diff::{diff, DiffEnv, VariationStatus};
use crate::driver::{self, DriverSummary, RunMode};
use crate::error::SyncError;
use crate::loader::{RecordLoader, Replica};
use crate::lock::{self, LockMeta};
use crate::scanner::{self, ScanSummary};
use crate::table_file::FileTableStore;
use crate::workspace::Workspace;
use dubsync_render::ChangeEntry;

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub config_path: PathBuf,
    pub config_created: bool,
    pub tables_created: Vec<TableRef>,
}

/// Write the scaffold config (unless present) and create the queue and
/// audit-log tables. Idempotent.
pub fn init_at(home: &Path) -> Result<InitReport, SyncError> {
    let config_path = config::config_path_at(home);
    let config_created = !config_path.exists();
    let config = if config_created {
        let config = Config::scaffold();
        config::save_at(home, &config)?;
        config
    } else {
        config::load_at(home)?
    };

    let labels = registry::labels_dir_at(home);
    std::fs::create_dir_all(&labels).map_err(|e| crate::error::io_err(&labels, e))?;

    let store = FileTableStore::open_at(home)?;
    let mut tables_created = Vec::new();
    for (table, header) in [(&config.queue, QUEUE_HEADER), (&config.audit_log, AUDIT_HEADER)] {
        let header = header.iter().map(|s| s.to_string()).collect();
        if store.create_table(table, header)? {
            tables_created.push(table.clone());
        }
    }
    tracing::info!(
        "initialised {} ({} tables created)",
        home.display(),
        tables_created.len()
    );
    Ok(InitReport {
        config_path,
        config_created,
        tables_created,
    })
}

// ---------------------------------------------------------------------------
// run / scan / continuations
// ---------------------------------------------------------------------------

/// One driver run; `quota` defaults to the configured driver quota.
pub fn drain_at(
    home: &Path,
    quota: Option<Duration>,
    mode: RunMode,
) -> Result<DriverSummary, SyncError> {
    let ws = Workspace::open_at(home)?;
    let quota = quota.unwrap_or_else(|| ws.config.quota());
    let mut ctx = ws.run_context()?;
    driver::run_with(&mut ctx, quota, mode)
}

/// One invocation of scan job `name`.
pub fn scan_at(home: &Path, name: &str) -> Result<ScanSummary, SyncError> {
    let ws = Workspace::open_at(home)?;
    let mut ctx = ws.run_context()?;
    scanner::run_job(&mut ctx, name)
}

/// A continuation taken off the schedule and what running it produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredContinuation {
    pub continuation: Continuation,
    pub summary: Option<ScanSummary>,
    pub error: Option<String>,
}

/// Run every continuation that is due. Failures are reported per entry.
pub fn fire_due_at(home: &Path) -> Result<Vec<FiredContinuation>, SyncError> {
    let ws = Workspace::open_at(home)?;
    let due = ws.continuations.take_due(ws.clock.now())?;
    let mut fired = Vec::with_capacity(due.len());
    for continuation in due {
        let result = match continuation.handler.strip_prefix("scan:") {
            Some(name) => ws
                .run_context()
                .and_then(|mut ctx| scanner::run_job(&mut ctx, name)),
            None => {
                tracing::warn!("dropping continuation with unknown handler {}", continuation.handler);
                continue;
            }
        };
        let (summary, error) = match result {
            Ok(summary) => (Some(summary), None),
            Err(e) => {
                tracing::error!("continuation {} failed: {e}", continuation.handler);
                (None, Some(e.to_string()))
            }
        };
        fired.push(FiredContinuation {
            continuation,
            summary,
            error,
        });
    }
    Ok(fired)
}

/// One scheduler tick: a scheduled driver run, then every due continuation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub run: Option<DriverSummary>,
    pub run_error: Option<String>,
    pub fired: Vec<FiredContinuation>,
}

/// Continuations fire even when the driver run fails, so a task stuck in
/// `Retry` or a stuck queue lock never starves a checkpointed scan.
pub fn tick_at(home: &Path) -> Result<TickReport, SyncError> {
    let (run, run_error) = match drain_at(home, None, RunMode::Scheduled) {
        Ok(summary) => (Some(summary), None),
        Err(e) => {
            tracing::error!("scheduled run failed: {e}");
            (None, Some(e.to_string()))
        }
    };
    let fired = fire_due_at(home)?;
    Ok(TickReport {
        run,
        run_error,
        fired,
    })
}

// ---------------------------------------------------------------------------
// enqueue
// ---------------------------------------------------------------------------

/// Append a pending task to the queue. Returns its 1-based queue row.
pub fn enqueue_at(
    home: &Path,
    table: &str,
    key: &str,
    env: &str,
    user: &str,
    action: TaskAction,
) -> Result<usize, SyncError> {
    let ws = Workspace::open_at(home)?;
    let env = EnvName::from(env);
    if ws.config.source_dataset(&env).is_none() {
        return Err(SyncError::UnknownEnv(env));
    }
    let task = Task::new(table, key, env, action, user, Some(ws.clock.now()));
    let mut ctx = ws.run_context()?;
    let index = ctx.append_row(&ws.config.queue, task.to_row())?;
    tracing::info!("enqueued {action} {table}/{key} at queue row {}", index + 1);
    Ok(index + 1)
}

// ---------------------------------------------------------------------------
// preview
// ---------------------------------------------------------------------------

/// What the driver would do with one queued task, computed without writing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub row: usize,
    pub task: TaskSummary,
    pub source: TableRef,
    pub witness: TableRef,
    pub archived: bool,
    pub status: VariationStatus,
    pub entries: Vec<ChangeEntry>,
    pub change_log: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub table: TableName,
    pub key: String,
    pub origin_env: EnvName,
    pub user: String,
    pub status: String,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            table: task.table.clone(),
            key: task.key.clone(),
            origin_env: task.origin_env.clone(),
            user: task.user.clone(),
            status: task.status.to_string(),
        }
    }
}

/// Preview the variation for the task at 1-based queue `row`.
pub fn preview_at(home: &Path, row: usize) -> Result<Preview, SyncError> {
    let ws = Workspace::open_at(home)?;
    let mut ctx = ws.run_context()?;
    let queue = ws.config.queue.clone();
    let cells = row
        .checked_sub(1)
        .and_then(|i| ctx.table(&queue).ok()?.rows.get(i).cloned())
        .ok_or(SyncError::NoSuchTask(row))?;
    let task = Task::from_row(&cells)?;

    let mut loader = RecordLoader::new();
    let resolution = loader.resolve(&mut ctx, &task.origin_env, &task.table, &task.key)?;
    let env = DiffEnv {
        users: &ctx.users,
        renderer: &ctx.renderer,
        now: ws.clock.now(),
        discreet: true,
    };
    let variation = diff(
        &task,
        resolution.source_row.as_ref().map(|(_, r)| r),
        resolution.witness_row.as_ref().map(|(_, r)| r),
        &resolution.schema,
        &resolution.header,
        &env,
        &ctx.staged,
    )?;
    Ok(Preview {
        row,
        task: TaskSummary::from(&task),
        source: resolution.source,
        witness: resolution.witness,
        archived: resolution.replica == Replica::Archive,
        status: variation.status,
        entries: variation.entries,
        change_log: variation.change_log_plain,
    })
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub control: ControlRecord,
    /// Queue rows per status code.
    pub queue: BTreeMap<String, usize>,
    pub checkpoints: BTreeMap<String, Checkpoint>,
    pub continuations: Vec<Continuation>,
    pub locks: Vec<LockMeta>,
}

impl StatusReport {
    pub fn open_tasks(&self) -> usize {
        [StatusCode::Pending, StatusCode::Retry]
            .iter()
            .filter_map(|s| self.queue.get(s.as_str()))
            .sum()
    }
}

pub fn status_at(home: &Path) -> Result<StatusReport, SyncError> {
    let ws = Workspace::open_at(home)?;
    let props = ws.properties.as_ref();

    let mut queue = BTreeMap::new();
    for row in ws.tables.get_all_rows(&ws.config.queue)? {
        let status = match Task::from_row(&row) {
            Ok(task) => task.status.to_string(),
            Err(_) => "Malformed".to_string(),
        };
        *queue.entry(status).or_insert(0) += 1;
    }

    let mut checkpoints = BTreeMap::new();
    for name in ws.config.scans.keys() {
        if let Some(cp) = load_checkpoint(props, name)? {
            checkpoints.insert(name.clone(), cp);
        }
    }

    Ok(StatusReport {
        control: load_control(props)?,
        queue,
        checkpoints,
        continuations: ws.continuations.pending()?,
        locks: lock::list_at(home)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().expect("home");
        let first = init_at(home.path()).expect("init");
        assert!(first.config_created);
        assert_eq!(first.tables_created.len(), 2);

        let second = init_at(home.path()).expect("init again");
        assert!(!second.config_created);
        assert!(second.tables_created.is_empty());
    }

    #[test]
    fn enqueue_rejects_unknown_env() {
        let home = TempDir::new().expect("home");
        init_at(home.path()).expect("init");
        let err = enqueue_at(home.path(), "DWO", "D1", "staging", "ana", TaskAction::Edit)
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownEnv(_)));
    }

    #[test]
    fn status_counts_queue_rows() {
        let home = TempDir::new().expect("home");
        init_at(home.path()).expect("init");
        enqueue_at(home.path(), "DWO", "D1", "prod", "ana", TaskAction::Edit).unwrap();
        enqueue_at(home.path(), "DWO", "D2", "prod", "ana", TaskAction::Insert).unwrap();

        let report = status_at(home.path()).expect("status");
        assert_eq!(report.queue.get("Pending"), Some(&2));
        assert_eq!(report.open_tasks(), 2);
        assert!(report.locks.is_empty());
    }

    #[test]
    fn tick_fires_due_continuations_when_the_run_fails() {
        let home = TempDir::new().expect("home");
        init_at(home.path()).expect("init");
        enqueue_at(home.path(), "Nope", "N1", "prod", "ana", TaskAction::Edit).unwrap();
        let ws = Workspace::open_at(home.path()).expect("workspace");
        ws.continuations
            .schedule_once("scan:health", Duration::ZERO)
            .expect("schedule");

        let report = tick_at(home.path()).expect("tick");
        assert!(report.run.is_none());
        assert!(report.run_error.is_some());
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].continuation.handler, "scan:health");
        let fired_id = report.fired[0].continuation.id;
        let pending = ws.continuations.pending().expect("pending");
        assert!(pending.iter().all(|c| c.id != fired_id));
    }

    #[test]
    fn preview_of_missing_row_is_an_error() {
        let home = TempDir::new().expect("home");
        init_at(home.path()).expect("init");
        assert!(matches!(
            preview_at(home.path(), 1),
            Err(SyncError::NoSuchTask(1))
        ));
        assert!(matches!(
            preview_at(home.path(), 0),
            Err(SyncError::NoSuchTask(0))
        ));
    }
}
