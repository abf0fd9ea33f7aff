//! `dubsync enqueue <table> <key> --env <env> --user <user> [--insert]`

use anyhow::{Context, Result};
use clap::Args;

use dubsync_core::TaskAction;
use dubsync_sync::pipeline;

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Entity table the changed record lives in.
    pub table: String,

    /// Primary key of the changed record.
    pub key: String,

    /// Environment the change originated in.
    #[arg(long, short = 'e')]
    pub env: String,

    /// User responsible for the change.
    #[arg(long, short = 'u')]
    pub user: String,

    /// Record is new at the source.
    #[arg(long)]
    pub insert: bool,
}

impl EnqueueArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let action = if self.insert {
            TaskAction::Insert
        } else {
            TaskAction::Edit
        };
        let row = pipeline::enqueue_at(
            &home,
            &self.table,
            &self.key,
            &self.env,
            &self.user,
            action,
        )
        .with_context(|| format!("failed to enqueue {}/{}", self.table, self.key))?;
        println!(
            "✓ Queued {action} {}/{} from {} at row {row}",
            self.table, self.key, self.env
        );
        Ok(())
    }
}
