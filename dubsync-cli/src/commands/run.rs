//! `dubsync run`, `dubsync tick`, `dubsync scan <job>`

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dubsync_sync::pipeline;
use dubsync_sync::{DriverSummary, RunMode, RunOutcome, ScanOutcome, ScanSummary};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Wall-clock budget for this run (defaults to the configured quota).
    #[arg(long, value_name = "SECS")]
    pub quota_secs: Option<u64>,

    /// Honour `nextRunAt` like the scheduler does instead of running now.
    #[arg(long)]
    pub scheduled: bool,

    /// Emit the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let mode = if self.scheduled {
            RunMode::Scheduled
        } else {
            RunMode::Immediate
        };
        let summary = pipeline::drain_at(&home, self.quota_secs.map(Duration::from_secs), mode)
            .context("queue run failed")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
            );
        } else {
            print_driver_summary(&summary);
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct TickArgs {}

impl TickArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let report = pipeline::tick_at(&home).context("tick failed")?;
        match (&report.run, &report.run_error) {
            (Some(summary), _) => print_driver_summary(summary),
            (None, Some(error)) => println!("{} Scheduled run failed: {error}", "✗".red().bold()),
            (None, None) => {}
        }

        for entry in &report.fired {
            match (&entry.summary, &entry.error) {
                (Some(summary), _) => print_scan_summary(summary),
                (None, Some(error)) => println!(
                    "{} {}: {error}",
                    "✗".red().bold(),
                    entry.continuation.handler
                ),
                (None, None) => {}
            }
        }

        if let Some(error) = report.run_error {
            anyhow::bail!("scheduled run failed: {error}");
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Scan job name from the config (e.g. `health`, `duplicates`).
    pub job: String,

    /// Emit the scan summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let summary = pipeline::scan_at(&home, &self.job)
            .with_context(|| format!("scan '{}' failed", self.job))?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
            );
        } else {
            print_scan_summary(&summary);
        }
        Ok(())
    }
}

pub(crate) fn print_driver_summary(summary: &DriverSummary) {
    let headline = match summary.outcome {
        RunOutcome::Completed => format!("{} Queue drained", "✓".green().bold()),
        RunOutcome::Checkpointed => format!(
            "{} Quota spent, resuming at row {}",
            "…".yellow().bold(),
            summary.resume_row.map(|r| r + 1).unwrap_or(0)
        ),
        RunOutcome::Busy => format!("{} Another run holds the queue lock", "·".bright_black()),
        RunOutcome::Skipped(reason) => {
            format!("{} Skipped ({reason:?})", "·".bright_black())
        }
    };
    println!("{headline}");
    if summary.processed > 0 {
        println!(
            "  {} processed: {} incorporated, {} unchanged, {} discarded, {} missing at source",
            summary.processed,
            summary.incorporated,
            summary.unchanged,
            summary.discarded,
            summary.source_missed_key
        );
    }
    if summary.duplicates_found > 0 {
        println!("  {} duplicate tasks collapsed", summary.duplicates_found);
    }
}

pub(crate) fn print_scan_summary(summary: &ScanSummary) {
    let headline = match &summary.outcome {
        ScanOutcome::Completed => format!("{} Scan '{}' complete", "✓".green().bold(), summary.scanner),
        ScanOutcome::Checkpointed(cp) => format!(
            "{} Scan '{}' checkpointed at table {} row {}",
            "…".yellow().bold(),
            summary.scanner,
            cp.table_index,
            cp.row_index
        ),
        ScanOutcome::Busy => format!(
            "{} Scan '{}' already running",
            "·".bright_black(),
            summary.scanner
        ),
    };
    println!("{headline}");
    println!(
        "  {} rows in {} chunks, {} findings",
        summary.rows_visited, summary.chunks, summary.findings
    );
    if summary.chunk_errors > 0 {
        println!("  {} {} chunk errors", "!".red().bold(), summary.chunk_errors);
    }
}
