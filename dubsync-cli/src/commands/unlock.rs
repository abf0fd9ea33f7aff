//! `dubsync unlock <name>`

use anyhow::{Context, Result};
use clap::Args;

use dubsync_sync::lock;

#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Lock name, e.g. `queue` or `scan:health`.
    pub name: String,
}

impl UnlockArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let holder = lock::inspect_at(&home, &self.name)
            .with_context(|| format!("failed to read lock '{}'", self.name))?;
        let removed = lock::force_release_at(&home, &self.name)
            .with_context(|| format!("failed to remove lock '{}'", self.name))?;

        match (removed, holder) {
            (true, Some(meta)) => println!(
                "✓ Released '{}' (pid {}, acquired {})",
                self.name, meta.pid, meta.acquired_at
            ),
            (true, None) => println!("✓ Released '{}'", self.name),
            (false, _) => println!("No lock named '{}' is held.", self.name),
        }
        Ok(())
    }
}
