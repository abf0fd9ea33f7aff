//! `dubsync diff <row>`: what a run would do with one queued task.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dubsync_sync::pipeline;
use dubsync_sync::VariationStatus;

/// Arguments for `dubsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// 1-based queue row.
    pub row: usize,

    /// Emit the preview as JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let preview = pipeline::preview_at(&home, self.row)
            .with_context(|| format!("preview failed for queue row {}", self.row))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&preview).context("failed to serialize preview")?
            );
            return Ok(());
        }

        println!(
            "Row {}: {}/{} from {} by {} [{}]",
            preview.row,
            preview.task.table,
            preview.task.key,
            preview.task.origin_env,
            preview.task.user,
            preview.task.status
        );
        println!(
            "  {} → {}{}",
            preview.source,
            preview.witness,
            if preview.archived { " (archive)" } else { "" }
        );

        let status = match preview.status {
            VariationStatus::Unchanged => "unchanged".bright_black().to_string(),
            VariationStatus::Append => "append".green().bold().to_string(),
            VariationStatus::Update => "update".yellow().bold().to_string(),
            VariationStatus::SourceMissedKey => "missing at source".red().bold().to_string(),
        };
        println!("  {status}");

        if preview.change_log.is_empty() {
            if preview.status == VariationStatus::Update {
                println!("  (modification stamp only)");
            }
            return Ok(());
        }
        for line in preview.change_log.lines() {
            println!("  {line}");
        }
        Ok(())
    }
}
