use std::path::PathBuf;

use anyhow::{Context, Result};

pub mod control;
pub mod daemon;
pub mod diff;
pub mod enqueue;
pub mod init;
pub mod labels;
pub mod run;
pub mod status;
pub mod unlock;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Log to stderr so `--json` output stays clean. `RUST_LOG` overrides the
/// default `warn` level.
pub(crate) fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
