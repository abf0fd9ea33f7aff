//! `dubsync daemon`: background runtime lifecycle and control.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use dubsync_daemon::paths::socket_path;
use dubsync_daemon::{
    request_run, request_scan, request_status, request_stop, start_blocking, DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run daemon in foreground (scheduler + queue watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over Unix socket.
    Stop,
    /// Query daemon runtime status over Unix socket.
    Status,
    /// Ask the running daemon to drain the queue now.
    Run,
    /// Ask the running daemon to run one invocation of a scan job.
    Scan {
        /// Scan job name from the config.
        job: String,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Run => {
            let summary = request_run(&home).context("daemon run failed")?;
            print_json(&summary)?;
        }
        DaemonCommand::Scan { job } => {
            let summary =
                request_scan(&home, &job).with_context(|| format!("daemon scan '{job}' failed"))?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
