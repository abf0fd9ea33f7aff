//! Change-log context: the structured record of one reconciliation, built by
//! the diff engine and rendered to HTML and plain text.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::RenderError;

/// Qualitative outcome of one column comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Plain old → new value change.
    Value,
    /// File reference appeared.
    Uploaded,
    /// File reference replaced by another.
    Changed,
    /// File reference removed.
    Deleted,
    /// Transient comment consumed from the source.
    Comment,
}

/// One column difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub column: String,
    pub kind: ChangeKind,
    pub old: String,
    pub new: String,
}

impl ChangeEntry {
    pub fn value(column: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: ChangeKind::Value,
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn file(column: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            column: column.into(),
            kind,
            old: String::new(),
            new: String::new(),
        }
    }

    pub fn comment(column: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: ChangeKind::Comment,
            old: String::new(),
            new: text.into(),
        }
    }
}

/// Who made a change and when, relative to the time of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeHeader {
    /// Display name of the user (already resolved through the directory).
    pub user: String,
    pub at: NaiveDateTime,
    /// Wall-clock time of the reconciliation.
    pub now: NaiveDateTime,
}

impl ChangeHeader {
    /// `HH:MM` for a change made today, `YYYY-MM-DD HH:MM` otherwise.
    pub fn stamp(&self) -> String {
        if self.at.date() == self.now.date() {
            self.at.format("%H:%M").to_string()
        } else {
            self.at.format("%Y-%m-%d %H:%M").to_string()
        }
    }
}

/// Everything one change-log rendering needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub header: ChangeHeader,
    pub entries: Vec<ChangeEntry>,
}

impl ChangeLog {
    pub fn new(header: ChangeHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: ChangeEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        let ctx = RenderCtx {
            user: &self.header.user,
            stamp: self.header.stamp(),
            entries: self.entries.iter().map(EntryCtx::from_entry).collect(),
        };
        tera::Context::from_serialize(ctx).map_err(RenderError::from)
    }
}

#[derive(Serialize)]
struct RenderCtx<'a> {
    user: &'a str,
    stamp: String,
    entries: Vec<EntryCtx<'a>>,
}

#[derive(Serialize)]
struct EntryCtx<'a> {
    column: &'a str,
    kind: ChangeKind,
    old: &'a str,
    new: &'a str,
    /// `-`/`+` prefixed lines for multi-line values, empty otherwise.
    diff_lines: Vec<String>,
}

impl<'a> EntryCtx<'a> {
    fn from_entry(entry: &'a ChangeEntry) -> Self {
        let multi_line = entry.old.contains('\n') || entry.new.contains('\n');
        let diff_lines = if entry.kind == ChangeKind::Value && multi_line {
            line_diff(&entry.old, &entry.new)
        } else {
            Vec::new()
        };
        Self {
            column: &entry.column,
            kind: entry.kind,
            old: &entry.old,
            new: &entry.new,
            diff_lines,
        }
    }
}

fn line_diff(old: &str, new: &str) -> Vec<String> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter_map(|change| {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => return None,
            };
            Some(format!("{sign} {}", change.value().trim_end_matches('\n')))
        })
        .collect()
}
