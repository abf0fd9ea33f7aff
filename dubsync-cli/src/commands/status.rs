//! `dubsync status`: control record, queue and scanner visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dubsync_sync::pipeline::{self, StatusReport};

/// Arguments for `dubsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let report = pipeline::status_at(&home)
            .context("failed to load workspace; run `dubsync init` first")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_report(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "tasks")]
    tasks: usize,
}

#[derive(Tabled)]
struct CheckpointRow {
    #[tabled(rename = "scan")]
    scan: String,
    #[tabled(rename = "dataset")]
    dataset: String,
    #[tabled(rename = "table #")]
    table: usize,
    #[tabled(rename = "next row")]
    row: usize,
}

#[derive(Tabled)]
struct ContinuationRow {
    #[tabled(rename = "handler")]
    handler: String,
    #[tabled(rename = "due")]
    due: String,
}

#[derive(Tabled)]
struct LockRow {
    #[tabled(rename = "lock")]
    name: String,
    #[tabled(rename = "pid")]
    pid: u32,
    #[tabled(rename = "held until")]
    hold_until: String,
}

fn print_report(report: &StatusReport) {
    let control = &report.control;
    let state = if control.enabled {
        "enabled".green().bold()
    } else {
        "disabled".red().bold()
    };
    println!(
        "dubsync v{} | driver {} | {} open tasks",
        env!("CARGO_PKG_VERSION"),
        state,
        report.open_tasks(),
    );
    println!(
        "  next run: {} | last run: {} → {}",
        fmt_time(control.next_run_at),
        fmt_time(control.last_check_start),
        fmt_time(control.last_check_end),
    );
    println!(
        "  window {}–{} every {}m (off-peak {}m) | batch {} | verbose {} | discreet {}",
        control.window_start.format("%H:%M"),
        control.window_end.format("%H:%M"),
        control.peak_interval_minutes,
        control.off_peak_interval_minutes,
        control.batch_size,
        control.verbose,
        control.discreet,
    );
    if let Some(row) = control.resume_row {
        println!("  {} resuming at queue row {}", "…".yellow().bold(), row + 1);
    }

    let separator = "■".repeat(60).bright_black().to_string();

    if !report.queue.is_empty() {
        println!("{separator}");
        let rows: Vec<QueueRow> = report
            .queue
            .iter()
            .map(|(status, tasks)| QueueRow {
                status: status.clone(),
                tasks: *tasks,
            })
            .collect();
        print_table(rows);
    }

    if !report.checkpoints.is_empty() {
        println!("{separator}");
        println!("{}", "CHECKPOINTS".bold());
        let rows: Vec<CheckpointRow> = report
            .checkpoints
            .iter()
            .map(|(scan, cp)| CheckpointRow {
                scan: scan.clone(),
                dataset: cp.dataset_id.clone(),
                table: cp.table_index,
                row: cp.row_index,
            })
            .collect();
        print_table(rows);
    }

    if !report.continuations.is_empty() {
        println!("{separator}");
        println!("{}", "CONTINUATIONS".bold());
        let rows: Vec<ContinuationRow> = report
            .continuations
            .iter()
            .map(|c| ContinuationRow {
                handler: c.handler.clone(),
                due: c.due_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        print_table(rows);
    }

    if !report.locks.is_empty() {
        println!("{separator}");
        println!("{}", "LOCKS".bold());
        let rows: Vec<LockRow> = report
            .locks
            .iter()
            .map(|l| LockRow {
                name: l.name.clone(),
                pid: l.pid,
                hold_until: l.hold_until.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        print_table(rows);
    }
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn fmt_time(at: Option<chrono::NaiveDateTime>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}
