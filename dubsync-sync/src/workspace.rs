//! Long-lived handles shared by every run: configuration and the storage,
//! timer and clock seams.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dubsync_core::{config, Config, PropertyStore, TableStore};

use crate::clock::{Clock, SystemClock};
use crate::context::RunContext;
use crate::continuation::{ContinuationScheduler, FileContinuations};
use crate::error::SyncError;
use crate::properties::FilePropertyStore;
use crate::table_file::FileTableStore;

#[derive(Clone)]
pub struct Workspace {
    pub home: PathBuf,
    pub config: Arc<Config>,
    pub tables: Arc<dyn TableStore>,
    pub properties: Arc<dyn PropertyStore>,
    pub continuations: Arc<dyn ContinuationScheduler>,
    pub clock: Arc<dyn Clock>,
}

impl Workspace {
    /// File-backed workspace rooted at `<home>/.dubsync/`, reading local time.
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        let config = config::load_at(home)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            home: home.to_path_buf(),
            config: Arc::new(config),
            tables: Arc::new(FileTableStore::open_at(home)?),
            properties: Arc::new(FilePropertyStore::open_at(home)),
            continuations: Arc::new(FileContinuations::open_at(home, clock.clone())),
            clock,
        })
    }

    pub fn new(
        home: &Path,
        config: Config,
        tables: Arc<dyn TableStore>,
        properties: Arc<dyn PropertyStore>,
        continuations: Arc<dyn ContinuationScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            home: home.to_path_buf(),
            config: Arc::new(config),
            tables,
            properties,
            continuations,
            clock,
        }
    }

    /// Fresh per-run state: labels loaded once, empty caches.
    pub fn run_context(&self) -> Result<RunContext, SyncError> {
        RunContext::new(self.clone())
    }
}
