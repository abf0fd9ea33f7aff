//! dubsync: checkpointed batch sync for dubbing production tables.
//!
//! # Usage
//!
//! ```text
//! dubsync init
//! dubsync enqueue <table> <key> --env <env> --user <user> [--insert]
//! dubsync run [--quota-secs N] [--scheduled]
//! dubsync tick
//! dubsync scan <job>
//! dubsync diff <row>
//! dubsync status [--json]
//! dubsync labels [<table>]
//! dubsync control [--enable|--disable] [--verbose on|off] [--discreet on|off] [--batch-size N]
//! dubsync unlock <name>
//! dubsync daemon start|stop|status|run|scan
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::ControlArgs, daemon::DaemonCommand, diff::DiffArgs, enqueue::EnqueueArgs,
    init::InitArgs, labels::LabelsArgs, run::RunArgs, run::ScanArgs, run::TickArgs,
    status::StatusArgs, unlock::UnlockArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dubsync",
    version,
    about = "Propagate queued record changes from source datasets into the witness dataset",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the workspace config, label directory, queue and audit log.
    Init(InitArgs),

    /// Append a pending task to the queue.
    Enqueue(EnqueueArgs),

    /// Drain the queue once.
    Run(RunArgs),

    /// Scheduled run plus any due scan continuations (for cron-style hosts).
    Tick(TickArgs),

    /// Run one invocation of a scan job.
    Scan(ScanArgs),

    /// Preview what a run would do with one queued task.
    Diff(DiffArgs),

    /// Show control record, queue counts, checkpoints, continuations and locks.
    Status(StatusArgs),

    /// Show column labels from the label registry.
    Labels(LabelsArgs),

    /// Inspect or change the driver control record.
    Control(ControlArgs),

    /// Remove a stuck advisory lock.
    Unlock(UnlockArgs),

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        commands::init_tracing();
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Enqueue(args) => args.run(),
        Commands::Run(args) => args.run(),
        Commands::Tick(args) => args.run(),
        Commands::Scan(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Labels(args) => args.run(),
        Commands::Control(args) => args.run(),
        Commands::Unlock(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
