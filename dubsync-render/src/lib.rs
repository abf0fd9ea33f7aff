//! # dubsync-render
//!
//! Tera-based renderer turning a structured [`ChangeLog`] into the HTML
//! fragment stored in the audit log and the plain text prepended to a
//! witness row's log-history column.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::NaiveDateTime;
//! use dubsync_render::{ChangeEntry, ChangeHeader, ChangeLog, ChangeLogRenderer};
//!
//! fn describe(at: NaiveDateTime) {
//!     let mut log = ChangeLog::new(ChangeHeader { user: "Ana".into(), at, now: at });
//!     log.push(ChangeEntry::value("Status", "A", "B"));
//!     if let Ok(renderer) = ChangeLogRenderer::new() {
//!         if let Ok(text) = renderer.render_plain(&log) {
//!             println!("{text}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{ChangeEntry, ChangeHeader, ChangeKind, ChangeLog};
pub use engine::{template_dir_at, ChangeLogRenderer, RenderedLog};
pub use error::RenderError;
