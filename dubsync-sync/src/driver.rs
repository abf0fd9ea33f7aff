//! Queue driver: drains pending tasks under a wall-clock quota.
//!
//! One run:
//!
//! 1. take the `queue` advisory lock (busy → [`RunOutcome::Busy`])
//! 2. consult the control record (disabled / not due / in progress → skip)
//! 3. stamp `lastCheckStart`
//! 4. collect up to `batchSize` non-terminal tasks, collapse adjacent
//!    duplicates, order by entity depth
//! 5. per task: crash marker → resolve → diff → apply → audit → final status
//! 6. on quota exhaustion record `resumeRow` and an early `nextRunAt`;
//!    otherwise schedule the next regular run
//! 7. stamp `lastCheckEnd`
//!
//! A task that fails is left in `Retry` and the error aborts the batch.

use std::time::Duration;

use serde::Serialize;

use dubsync_core::types::set_cell;
use dubsync_core::{Cell, ControlRecord, StatusCode, Task};

use crate::audit;
use crate::checkpoint::{load_control, save_control};
use crate::context::RunContext;
use crate::diff::{diff, DiffEnv, VariationStatus};
use crate::error::SyncError;
use crate::loader::RecordLoader;
use crate::lock::AdvisoryLock;
use crate::quota::Quota;

pub const QUEUE_LOCK: &str = "queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Disabled,
    NotDue,
    InProgress,
}

/// Whether a run waits for `nextRunAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Scheduled,
    /// Requested by an operator or by a queue change; ignores `nextRunAt`.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    Completed,
    Checkpointed,
    Busy,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSummary {
    pub processed: usize,
    pub incorporated: usize,
    pub unchanged: usize,
    pub discarded: usize,
    pub source_missed_key: usize,
    pub duplicates_found: usize,
    pub outcome: RunOutcome,
    pub resume_row: Option<usize>,
}

impl DriverSummary {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            processed: 0,
            incorporated: 0,
            unchanged: 0,
            discarded: 0,
            source_missed_key: 0,
            duplicates_found: 0,
            outcome,
            resume_row: None,
        }
    }

    fn count(&mut self, outcome: StatusCode) {
        self.processed += 1;
        match outcome {
            StatusCode::Incorporated => self.incorporated += 1,
            StatusCode::Unchanged => self.unchanged += 1,
            StatusCode::Discarded => self.discarded += 1,
            StatusCode::SourceMissedKey => self.source_missed_key += 1,
            StatusCode::Pending | StatusCode::Retry => {}
        }
    }
}

/// One queued task selected for this batch.
#[derive(Debug, Clone)]
struct BatchItem {
    row: usize,
    task: Task,
    duplicate_of: Option<usize>,
}

pub fn run(ctx: &mut RunContext, max_wall_clock: Duration) -> Result<DriverSummary, SyncError> {
    run_with(ctx, max_wall_clock, RunMode::Scheduled)
}

pub fn run_with(
    ctx: &mut RunContext,
    max_wall_clock: Duration,
    mode: RunMode,
) -> Result<DriverSummary, SyncError> {
    let ws = ctx.ws.clone();
    let config = ws.config.clone();

    let Some(_guard) = AdvisoryLock::try_acquire(
        &ws.home,
        QUEUE_LOCK,
        ws.clock.as_ref(),
        config.lock_acquire_timeout(),
        config.lock_hold(),
    )?
    else {
        tracing::info!("queue run skipped: another run holds the lock");
        return Ok(DriverSummary::new(RunOutcome::Busy));
    };
    ctx.reset();

    let mut control = load_control(ws.properties.as_ref())?;
    let now = ws.clock.now();
    let hold = chrono::Duration::from_std(config.lock_hold())
        .unwrap_or_else(|_| chrono::Duration::minutes(15));
    let skip = if !control.enabled {
        Some(SkipReason::Disabled)
    } else if mode == RunMode::Scheduled && !control.is_due(now) {
        Some(SkipReason::NotDue)
    } else if control.run_in_progress(now, hold) {
        Some(SkipReason::InProgress)
    } else {
        None
    };
    if let Some(reason) = skip {
        tracing::debug!("queue run skipped: {reason:?}");
        return Ok(DriverSummary::new(RunOutcome::Skipped(reason)));
    }

    ctx.verbose = control.verbose;
    ctx.discreet = control.discreet;
    control.last_check_start = Some(now);
    save_control(ws.properties.as_ref(), &control)?;

    let result = drain(ctx, &mut control, max_wall_clock);

    control.last_check_end = Some(ws.clock.now());
    match (save_control(ws.properties.as_ref(), &control), &result) {
        (Err(e), Ok(_)) => return Err(e),
        (Err(e), Err(_)) => tracing::error!("failed to stamp run end: {e}"),
        (Ok(()), _) => {}
    }
    if let Ok(summary) = &result {
        tracing::info!(
            "queue run {:?}: {} processed, {} incorporated, {} unchanged, {} discarded, {} missing at source",
            summary.outcome,
            summary.processed,
            summary.incorporated,
            summary.unchanged,
            summary.discarded,
            summary.source_missed_key
        );
    }
    result
}

fn drain(
    ctx: &mut RunContext,
    control: &mut ControlRecord,
    max_wall_clock: Duration,
) -> Result<DriverSummary, SyncError> {
    let config = ctx.ws.config.clone();
    let clock = ctx.ws.clock.clone();
    let mut summary = DriverSummary::new(RunOutcome::Completed);

    let mut batch = collect_batch(ctx, control)?;
    for i in 1..batch.len() {
        if batch[i].task.identity() == batch[i - 1].task.identity() {
            batch[i].duplicate_of = Some(batch[i - 1].row);
            summary.duplicates_found += 1;
        }
    }
    // Parents before children; stable within a depth.
    batch.sort_by_key(|item| config.depth_of(&item.task.table));

    let mut loader = RecordLoader::new();
    let mut quota = Quota::start(
        clock.as_ref(),
        max_wall_clock,
        config.driver.clock_check_every,
    );
    for pos in 0..batch.len() {
        if pos > 0 && quota.tick(clock.as_ref()) {
            let resume = batch[pos..].iter().map(|item| item.row).min();
            let delay =
                chrono::Duration::from_std(Duration::from_secs(config.driver.resume_delay_secs))
                    .unwrap_or_else(|_| chrono::Duration::minutes(1));
            control.next_run_at = Some(clock.now() + delay);
            control.resume_row = resume;
            summary.outcome = RunOutcome::Checkpointed;
            summary.resume_row = resume;
            tracing::info!(
                "quota spent after {} of {} tasks; resuming at queue row {:?}",
                pos,
                batch.len(),
                resume
            );
            return Ok(summary);
        }
        let item = batch[pos].clone();
        let outcome = process(ctx, &mut loader, item)?;
        summary.count(outcome);
    }

    control.next_run_at = Some(clock.now() + control.interval_at(clock.now()));
    control.resume_row = None;
    Ok(summary)
}

fn collect_batch(
    ctx: &mut RunContext,
    control: &ControlRecord,
) -> Result<Vec<BatchItem>, SyncError> {
    let queue = ctx.ws.config.queue.clone();
    let rows = ctx.table(&queue)?.rows.clone();
    let first_open = rows.iter().position(|row| {
        Task::from_row(row)
            .map(|t| !t.status.is_terminal())
            .unwrap_or(false)
    });
    let start = match control.resume_row {
        Some(row) if row < rows.len() => row,
        _ => first_open.unwrap_or(rows.len()),
    };

    let limit = control.batch_size.max(1);
    let mut batch = Vec::new();
    for (row, cells) in rows.iter().enumerate().skip(start) {
        if batch.len() >= limit {
            break;
        }
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        match Task::from_row(cells) {
            Ok(task) if task.status.is_terminal() => {}
            Ok(task) => batch.push(BatchItem {
                row,
                task,
                duplicate_of: None,
            }),
            Err(e) => tracing::warn!("skipping malformed queue row {}: {e}", row + 1),
        }
    }
    Ok(batch)
}

fn process(
    ctx: &mut RunContext,
    loader: &mut RecordLoader,
    item: BatchItem,
) -> Result<StatusCode, SyncError> {
    let queue = ctx.ws.config.queue.clone();
    let BatchItem {
        row,
        mut task,
        duplicate_of,
    } = item;

    let discard_reason = match duplicate_of {
        Some(prev) => Some(format!("duplicate of queue row {}", prev + 1)),
        None if task.key.trim().is_empty() => Some("empty key".to_string()),
        None => None,
    };
    if let Some(reason) = discard_reason {
        let now = ctx.now();
        task.discard(now, &reason)?;
        if ctx.verbose {
            task.log_ref = audit::record(ctx, &task, StatusCode::Discarded, now, &reason, "")?;
        }
        ctx.write_row(&queue, row, task.to_row())?;
        tracing::debug!("{}/{} discarded: {reason}", task.table, task.key);
        return Ok(StatusCode::Discarded);
    }

    task.begin()?;
    ctx.write_row(&queue, row, task.to_row())?;

    match reconcile(ctx, loader, &mut task) {
        Ok(outcome) => {
            task.complete(outcome, ctx.now())?;
            ctx.write_row(&queue, row, task.to_row())?;
            if ctx.verbose {
                tracing::info!("{}/{} → {outcome}", task.table, task.key);
            } else {
                tracing::debug!("{}/{} → {outcome}", task.table, task.key);
            }
            Ok(outcome)
        }
        Err((stage, e)) => {
            tracing::error!(
                "task {}/{} failed at {stage} (queue row {}): {e}",
                task.table,
                task.key,
                row + 1
            );
            task.fail(&e.to_string())?;
            ctx.write_row(&queue, row, task.to_row())?;
            Err(SyncError::Task {
                table: task.table.0.clone(),
                key: task.key.clone(),
                stage,
                source: Box::new(e),
            })
        }
    }
}

/// Resolve, diff, apply and audit one task. Errors carry the failing stage.
fn reconcile(
    ctx: &mut RunContext,
    loader: &mut RecordLoader,
    task: &mut Task,
) -> Result<StatusCode, (&'static str, SyncError)> {
    let resolution = loader
        .resolve(ctx, &task.origin_env, &task.table, &task.key)
        .map_err(|e| ("resolve", e))?;

    let now = ctx.now();
    let variation = {
        let env = DiffEnv {
            users: &ctx.users,
            renderer: &ctx.renderer,
            now,
            discreet: ctx.discreet,
        };
        diff(
            task,
            resolution.source_row.as_ref().map(|(_, row)| row),
            resolution.witness_row.as_ref().map(|(_, row)| row),
            &resolution.schema,
            &resolution.header,
            &env,
            &ctx.staged,
        )
        .map_err(|e| ("diff", e))?
    };

    let outcome = match variation.status {
        VariationStatus::Append => {
            ctx.append_row(&resolution.witness, variation.merged_row.clone())
                .map_err(|e| ("apply", e))?;
            ctx.staged.insert(task.staging_key());
            StatusCode::Incorporated
        }
        VariationStatus::Update => {
            if let Some((index, _)) = &resolution.witness_row {
                ctx.write_row(&resolution.witness, *index, variation.merged_row.clone())
                    .map_err(|e| ("apply", e))?;
            }
            StatusCode::Incorporated
        }
        VariationStatus::Unchanged => StatusCode::Unchanged,
        VariationStatus::SourceMissedKey => StatusCode::SourceMissedKey,
    };

    if let (Some(col), Some((index, source_row)), StatusCode::Incorporated) =
        (variation.clear_column, &resolution.source_row, outcome)
    {
        let mut consumed = source_row.clone();
        set_cell(&mut consumed, col, Cell::Empty);
        ctx.write_row(&resolution.source, *index, consumed)
            .map_err(|e| ("apply", e))?;
    }

    let audited = matches!(outcome, StatusCode::Incorporated | StatusCode::SourceMissedKey);
    if audited || ctx.verbose {
        task.log_ref = audit::record(
            ctx,
            task,
            outcome,
            now,
            &variation.change_log_plain,
            &variation.change_log_html,
        )
        .map_err(|e| ("audit", e))?;
    }
    Ok(outcome)
}
