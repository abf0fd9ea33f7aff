//! Checkpointed full-table scanner.
//!
//! Walks every data row of a job's tables in chunks. The quota is checked at
//! each chunk boundary; when it is spent the position is written to
//! `checkpoint.<scanner>` and a continuation `scan:<scanner>` is registered so
//! the host invokes the scan again. A completed scan deletes its checkpoint
//! and cancels any pending continuation.
//!
//! Two visitors share the skeleton: [`HealthCheck`] re-enqueues rows whose
//! source is ahead of the witness, [`DuplicateDetector`] clears repeated keys.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use dubsync_core::types::cell_at;
use dubsync_core::{
    Checkpoint, CoreError, DatasetId, EnvName, Row, ScanJob, ScanKind, Table, TableName,
    TableRef, TableSchema, Task, TaskAction,
};

use crate::checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint};
use crate::context::RunContext;
use crate::error::SyncError;
use crate::loader::RecordLoader;
use crate::lock::AdvisoryLock;
use crate::quota::Quota;

/// Queue user recorded on tasks enqueued by the health check.
pub const HEALTH_CHECK_USER: &str = "health-check";

const FINDINGS_FLAG: &str = "findings";

/// Handler and lock name of scanner `name`.
pub fn handler_name(name: &str) -> String {
    format!("scan:{name}")
}

/// Per-row work plugged into [`scan`].
pub trait RowVisitor {
    /// Called before the first chunk of `table` in this invocation; `resume_at`
    /// is the first row that will be visited.
    fn begin_table(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        resume_at: usize,
    ) -> Result<(), SyncError>;

    /// Visit rows `start..start + rows.len()`. Returns the number of findings.
    fn visit_chunk(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        start: usize,
        rows: &[Row],
    ) -> Result<usize, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOutcome {
    Completed,
    Checkpointed(Checkpoint),
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub scanner: String,
    pub rows_visited: usize,
    pub chunks: usize,
    pub chunk_errors: usize,
    /// Findings across every invocation of this logical scan.
    pub findings: usize,
    pub outcome: ScanOutcome,
}

pub fn scan(
    ctx: &mut RunContext,
    name: &str,
    job: &ScanJob,
    dataset: &DatasetId,
    visitor: &mut dyn RowVisitor,
    max_wall_clock: Duration,
) -> Result<ScanSummary, SyncError> {
    let ws = ctx.ws.clone();
    let handler = handler_name(name);
    let mut summary = ScanSummary {
        scanner: name.to_string(),
        rows_visited: 0,
        chunks: 0,
        chunk_errors: 0,
        findings: 0,
        outcome: ScanOutcome::Completed,
    };

    let Some(_guard) = AdvisoryLock::try_acquire(
        &ws.home,
        &handler,
        ws.clock.as_ref(),
        ws.config.lock_acquire_timeout(),
        ws.config.lock_hold(),
    )?
    else {
        tracing::info!("scan {name} skipped: another run holds the lock");
        summary.outcome = ScanOutcome::Busy;
        return Ok(summary);
    };
    ctx.reset();

    let props = ws.properties.as_ref();
    let resume = match load_checkpoint(props, name)? {
        Some(cp) if cp.dataset_id == dataset.0 => {
            tracing::info!(
                "scan {name} resuming at table {} row {}",
                cp.table_index,
                cp.row_index
            );
            Some(cp)
        }
        Some(cp) => {
            tracing::warn!(
                "scan {name}: checkpoint belongs to dataset {}, starting {dataset} from the top",
                cp.dataset_id
            );
            None
        }
        None => None,
    };
    let (start_table, start_row) = resume
        .as_ref()
        .map(|cp| (cp.table_index, cp.row_index))
        .unwrap_or((0, 0));
    summary.findings = resume
        .as_ref()
        .and_then(|cp| cp.flags.get(FINDINGS_FLAG))
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(0);

    let mut quota = Quota::start(ws.clock.as_ref(), max_wall_clock, 1);
    let mut first_chunk = true;

    for (table_index, table_name) in job.tables.iter().enumerate().skip(start_table) {
        let table = TableRef {
            dataset: dataset.clone(),
            table: table_name.clone(),
        };
        let total = match ws.tables.row_count(&table) {
            Ok(n) => n,
            Err(CoreError::UnknownTable(_)) => {
                tracing::warn!("scan {name}: table {table} does not exist, skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let mut row = if table_index == start_table { start_row } else { 0 };
        visitor.begin_table(ctx, &table, row)?;
        let chunk = job.chunk_size_for(table_name);

        while row < total {
            if !first_chunk && quota.check(ws.clock.as_ref()) {
                let mut checkpoint = Checkpoint {
                    table_index,
                    row_index: row,
                    dataset_id: dataset.0.clone(),
                    flags: Default::default(),
                };
                checkpoint
                    .flags
                    .insert(FINDINGS_FLAG.to_string(), summary.findings.into());
                save_checkpoint(props, name, &checkpoint)?;
                // At most one pending continuation per scanner.
                ws.continuations.cancel_all(&handler)?;
                ws.continuations
                    .schedule_once(&handler, job.continuation_delay())?;
                tracing::info!(
                    "scan {name} checkpointed at {table} row {} after {} rows",
                    row,
                    summary.rows_visited
                );
                summary.outcome = ScanOutcome::Checkpointed(checkpoint);
                return Ok(summary);
            }
            first_chunk = false;

            let rows = ws.tables.get_row_range(&table, row, chunk)?;
            if rows.is_empty() {
                break;
            }
            match visitor.visit_chunk(ctx, &table, row, &rows) {
                Ok(found) => summary.findings += found,
                Err(e) => {
                    summary.chunk_errors += 1;
                    tracing::error!(
                        "scan {name}: chunk {table} rows {}..{} failed: {e}",
                        row,
                        row + rows.len()
                    );
                }
            }
            summary.chunks += 1;
            summary.rows_visited += rows.len();
            row += rows.len();
        }
    }

    clear_checkpoint(props, name)?;
    let cancelled = ws.continuations.cancel_all(&handler)?;
    tracing::info!(
        "scan {name} completed: {} rows, {} findings, {} chunk errors, {} continuations cancelled",
        summary.rows_visited,
        summary.findings,
        summary.chunk_errors,
        cancelled
    );
    Ok(summary)
}

/// Run the configured scan job `name` under its quota (or the driver quota).
pub fn run_job(ctx: &mut RunContext, name: &str) -> Result<ScanSummary, SyncError> {
    let config = ctx.ws.config.clone();
    let job = config
        .scans
        .get(name)
        .cloned()
        .ok_or_else(|| SyncError::UnknownScan(name.to_string()))?;
    let quota = job
        .quota_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.quota());

    match job.kind {
        ScanKind::Health => {
            let env = job
                .source_env
                .clone()
                .or_else(|| config.environments.keys().next().cloned())
                .ok_or_else(|| SyncError::UnknownEnv(EnvName::from("<none configured>")))?;
            let dataset = match &job.dataset {
                Some(dataset) => dataset.clone(),
                None => config
                    .source_dataset(&env)
                    .cloned()
                    .ok_or_else(|| SyncError::UnknownEnv(env.clone()))?,
            };
            let mut visitor = HealthCheck::new(env);
            scan(ctx, name, &job, &dataset, &mut visitor, quota)
        }
        ScanKind::Duplicates => {
            let dataset = job
                .dataset
                .clone()
                .unwrap_or_else(|| config.active_dataset.clone());
            let mut visitor = DuplicateDetector::new(job.report_only);
            scan(ctx, name, &job, &dataset, &mut visitor, quota)
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Enqueues a synthetic task for each source row whose witness is missing
/// (`Insert`) or older (`Edit`). Keys with an open task are left alone.
pub struct HealthCheck {
    env: EnvName,
    loader: RecordLoader,
    schema: Option<TableSchema>,
    open: Option<HashSet<(TableName, String)>>,
}

impl HealthCheck {
    pub fn new(env: EnvName) -> Self {
        Self {
            env,
            loader: RecordLoader::new(),
            schema: None,
            open: None,
        }
    }

    fn load_open(ctx: &mut RunContext) -> Result<HashSet<(TableName, String)>, SyncError> {
        let queue = ctx.ws.config.queue.clone();
        Ok(ctx
            .table(&queue)?
            .rows
            .iter()
            .filter_map(|row| Task::from_row(row).ok())
            .filter(|task| !task.status.is_terminal())
            .map(|task| (task.table, task.key))
            .collect())
    }
}

impl RowVisitor for HealthCheck {
    fn begin_table(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        _resume_at: usize,
    ) -> Result<(), SyncError> {
        self.schema = Some(ctx.schema(&table.table));
        if self.open.is_none() {
            self.open = Some(Self::load_open(ctx)?);
        }
        Ok(())
    }

    fn visit_chunk(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        _start: usize,
        rows: &[Row],
    ) -> Result<usize, SyncError> {
        let schema = self
            .schema
            .clone()
            .unwrap_or_else(|| TableSchema::fallback(table.table.clone()));
        let key_column = schema.key_column();
        let stamp_of = |row: &Row| {
            schema
                .last_changed_column
                .and_then(|col| cell_at(row, col).as_date())
        };
        let queue = ctx.ws.config.queue.clone();
        let mut enqueued = 0;

        for row in rows {
            let key = cell_at(row, key_column).as_text().trim().to_string();
            if key.is_empty() {
                continue;
            }
            let open = self.open.get_or_insert_with(HashSet::new);
            if open.contains(&(table.table.clone(), key.clone())) {
                continue;
            }
            let resolution = self.loader.resolve(ctx, &self.env, &table.table, &key)?;
            let source_stamp = stamp_of(row);
            let action = match &resolution.witness_row {
                None => Some(TaskAction::Insert),
                Some((_, witness)) if source_stamp > stamp_of(witness) => Some(TaskAction::Edit),
                Some(_) => None,
            };
            let Some(action) = action else {
                continue;
            };

            let task = Task::new(
                table.table.clone(),
                key.clone(),
                self.env.clone(),
                action,
                HEALTH_CHECK_USER,
                Some(source_stamp.unwrap_or_else(|| ctx.now())),
            );
            ctx.append_row(&queue, task.to_row())?;
            tracing::info!("health check: enqueued {action} for {}/{key}", table.table);
            if let Some(open) = self.open.as_mut() {
                open.insert((table.table.clone(), key));
            }
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

// ---------------------------------------------------------------------------
// Duplicate detector
// ---------------------------------------------------------------------------

/// Keeps the earliest row of each key; later rows are counted and cleared.
pub struct DuplicateDetector {
    report_only: bool,
    key_column: usize,
    seen: HashMap<String, usize>,
}

impl DuplicateDetector {
    pub fn new(report_only: bool) -> Self {
        Self {
            report_only,
            key_column: 0,
            seen: HashMap::new(),
        }
    }

    fn note(&mut self, index: usize, row: &Row) -> Option<usize> {
        let cell = cell_at(row, self.key_column);
        if cell.is_empty() {
            return None;
        }
        match self.seen.entry(cell.as_text().trim().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(index);
                None
            }
            Entry::Occupied(first) => Some(*first.get()),
        }
    }
}

impl RowVisitor for DuplicateDetector {
    fn begin_table(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        resume_at: usize,
    ) -> Result<(), SyncError> {
        self.key_column = ctx.schema(&table.table).key_column();
        self.seen = if resume_at > 0 {
            let before = Table {
                header: Vec::new(),
                rows: ctx.ws.tables.get_row_range(table, 0, resume_at)?,
            };
            before.key_index(self.key_column)
        } else {
            HashMap::new()
        };
        Ok(())
    }

    fn visit_chunk(
        &mut self,
        ctx: &mut RunContext,
        table: &TableRef,
        start: usize,
        rows: &[Row],
    ) -> Result<usize, SyncError> {
        let mut found = 0;
        for (offset, row) in rows.iter().enumerate() {
            let index = start + offset;
            let Some(first) = self.note(index, row) else {
                continue;
            };
            found += 1;
            tracing::warn!(
                "duplicate key in {table}: row {index} repeats row {first}{}",
                if self.report_only { "" } else { ", clearing" }
            );
            if !self.report_only {
                ctx.ws.tables.clear_row_range(table, index, 1)?;
                ctx.cache.invalidate(table);
            }
        }
        Ok(found)
    }
}
