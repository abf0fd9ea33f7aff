//! # dubsync-sync
//!
//! The checkpointed batch-sync engine.
//!
//! Call [`driver::run`] to drain the task queue, or [`scanner::run_job`] to
//! walk full tables for the health check and duplicate detector. Both take a
//! [`RunContext`] built from a [`Workspace`]; the [`pipeline`] functions wrap
//! the file-backed workspace for the CLI and the daemon.

pub mod audit;
pub mod checkpoint;
pub mod clock;
pub mod context;
pub mod continuation;
pub mod diff;
pub mod driver;
pub mod error;
pub mod hash_store;
pub mod loader;
pub mod lock;
pub mod pipeline;
pub mod properties;
pub mod quota;
pub mod scanner;
pub mod table_file;
pub mod users;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RunContext, TableCache};
pub use continuation::{Continuation, ContinuationScheduler, FileContinuations};
pub use diff::{VariationResult, VariationStatus};
pub use driver::{DriverSummary, RunMode, RunOutcome, SkipReason};
pub use error::SyncError;
pub use lock::{AdvisoryLock, LockGuard, LockMeta};
pub use scanner::{ScanOutcome, ScanSummary};
pub use table_file::{FileTableStore, WriteResult};
pub use workspace::Workspace;
