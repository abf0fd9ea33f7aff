//! dubsync daemon: scheduled queue runs, a queue-table watcher, scan
//! continuations and a Unix-socket control channel.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_run, request_scan, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, Activity};
