//! `dubsync init`

use anyhow::{Context, Result};
use clap::Args;

use dubsync_core::registry;
use dubsync_sync::pipeline;

/// Create the workspace under `~/.dubsync/`.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let report = pipeline::init_at(&home).context("failed to initialise workspace")?;

        if report.config_created {
            println!("✓ Wrote config: {}", report.config_path.display());
        } else {
            println!("· Config already present: {}", report.config_path.display());
        }
        for table in &report.tables_created {
            println!("✓ Created table {table}");
        }
        println!(
            "  Label registry: {}",
            registry::labels_dir_at(&home).display()
        );
        Ok(())
    }
}
