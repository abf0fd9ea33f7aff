//! `dubsync control`: inspect or edit the driver control record.

use anyhow::{Context, Result};
use clap::Args;

use dubsync_sync::checkpoint::{load_control, save_control};
use dubsync_sync::properties::FilePropertyStore;

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Allow scheduled runs.
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// Stop scheduled runs (operator pause).
    #[arg(long)]
    pub disable: bool,

    /// Audit unchanged and discarded tasks too.
    #[arg(long, value_name = "on|off", value_parser = parse_switch)]
    pub verbose: Option<bool>,

    /// Do not append to log-history columns.
    #[arg(long, value_name = "on|off", value_parser = parse_switch)]
    pub discreet: Option<bool>,

    /// Tasks per run.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    /// Make the next scheduled check run immediately.
    #[arg(long)]
    pub due_now: bool,
}

impl ControlArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let props = FilePropertyStore::open_at(&home);
        let mut control = load_control(&props).context("failed to load control record")?;

        let mut changed = false;
        if self.enable || self.disable {
            control.enabled = self.enable;
            changed = true;
        }
        if let Some(verbose) = self.verbose {
            control.verbose = verbose;
            changed = true;
        }
        if let Some(discreet) = self.discreet {
            control.discreet = discreet;
            changed = true;
        }
        if let Some(size) = self.batch_size {
            control.batch_size = usize::try_from(size).unwrap_or(usize::MAX);
            changed = true;
        }
        if self.due_now {
            control.next_run_at = None;
            changed = true;
        }

        if changed {
            save_control(&props, &control).context("failed to save control record")?;
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&control).context("failed to serialize control record")?
        );
        Ok(())
    }
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}
