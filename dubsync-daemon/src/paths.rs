use std::path::{Path, PathBuf};
use std::time::Duration;

use dubsync_core::TableRef;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// How often the daemon checks whether a queue run or a continuation is due.
pub const TICK_INTERVAL: Duration = Duration::from_secs(15);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn dubsync_root(home: &Path) -> PathBuf {
    home.join(".dubsync")
}

pub fn run_dir(home: &Path) -> PathBuf {
    dubsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    dubsync_root(home).join(DAEMON_SOCKET)
}

/// File the watcher reacts to: the queue table.
pub fn queue_path(home: &Path, queue: &TableRef) -> PathBuf {
    dubsync_sync::table_file::table_path_at(home, queue)
}
