//! Field-by-field comparison of a source row against its witness.
//!
//! Each column is compared according to its [`ColumnLabel`]; any difference
//! turns the result into an update and yields a [`ChangeEntry`] rendered into
//! the HTML and plain change logs. Diffing is pure: the caller applies the
//! merged row.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::Serialize;

use dubsync_core::types::{cell_at, column_letter, set_cell};
use dubsync_core::{Cell, ColumnLabel, Row, TableSchema, Task};
use dubsync_render::{ChangeEntry, ChangeHeader, ChangeKind, ChangeLog, ChangeLogRenderer};

use crate::error::SyncError;
use crate::users::UserDirectory;

const LAST_CHANGED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VariationStatus {
    Unchanged,
    Append,
    Update,
    SourceMissedKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariationResult {
    pub status: VariationStatus,
    /// Row to write to the witness (append or overwrite).
    pub merged_row: Row,
    pub change_log_html: String,
    pub change_log_plain: String,
    /// Source comment column consumed by this merge; cleared after apply.
    pub clear_column: Option<usize>,
    pub entries: Vec<ChangeEntry>,
}

impl VariationResult {
    fn unchanged(row: Row) -> Self {
        Self {
            status: VariationStatus::Unchanged,
            merged_row: row,
            change_log_html: String::new(),
            change_log_plain: String::new(),
            clear_column: None,
            entries: Vec::new(),
        }
    }
}

/// Collaborators and flags the diff engine reads.
pub struct DiffEnv<'a> {
    pub users: &'a UserDirectory,
    pub renderer: &'a ChangeLogRenderer,
    pub now: NaiveDateTime,
    /// Discreet runs keep the log-history column untouched.
    pub discreet: bool,
}

pub fn diff(
    task: &Task,
    source: Option<&Row>,
    witness: Option<&Row>,
    schema: &TableSchema,
    header: &[String],
    env: &DiffEnv<'_>,
    staged: &HashSet<String>,
) -> Result<VariationResult, SyncError> {
    let Some(source) = source else {
        let mut result = VariationResult::unchanged(witness.cloned().unwrap_or_default());
        result.status = VariationStatus::SourceMissedKey;
        return Ok(result);
    };

    let (base, status) = match witness {
        None if staged.contains(&task.staging_key()) => {
            return Ok(VariationResult::unchanged(source.clone()));
        }
        None => (Row::new(), VariationStatus::Append),
        Some(w) if rows_identical(source, w) => {
            return Ok(VariationResult::unchanged(w.clone()));
        }
        Some(w) => (w.clone(), VariationStatus::Update),
    };

    let mut merged = base.clone();
    let mut entries = Vec::new();
    let mut clear_column = None;
    let mut changed = false;

    let width = source.len().max(base.len()).max(header.len());
    for col in 0..width {
        let old = cell_at(&base, col);
        let new = cell_at(source, col);

        if Some(col) == schema.last_changed_column {
            if stamp(old, LAST_CHANGED_FORMAT) != stamp(new, LAST_CHANGED_FORMAT) {
                set_cell(&mut merged, col, new.clone());
                changed = true;
            }
            continue;
        }
        if Some(col) == schema.log_history_column {
            continue;
        }

        let name = column_name(header, col);
        let entry = match schema.label(col) {
            ColumnLabel::Key => {
                set_cell(&mut merged, col, new.clone());
                continue;
            }
            ColumnLabel::Skip => continue,
            ColumnLabel::Comment => {
                if new.is_empty() {
                    continue;
                }
                set_cell(&mut merged, col, Cell::Empty);
                clear_column.get_or_insert(col);
                changed = true;
                entries.push(ChangeEntry::comment(name, new.as_text().trim()));
                continue;
            }
            ColumnLabel::DateOnly => {
                compare_text(&name, stamp(old, DATE_ONLY_FORMAT), stamp(new, DATE_ONLY_FORMAT))
            }
            ColumnLabel::DateTime => {
                compare_text(&name, stamp(old, DATE_TIME_FORMAT), stamp(new, DATE_TIME_FORMAT))
            }
            ColumnLabel::UserRef => compare_text(
                &name,
                display_user(env.users, old),
                display_user(env.users, new),
            ),
            ColumnLabel::FileRef => compare_file(&name, old, new),
            ColumnLabel::SuffixStrip(suffix) => {
                let strip = |c: &Cell| {
                    let text = c.as_text();
                    let text = text.trim();
                    text.strip_suffix(suffix.as_str()).unwrap_or(text).trim().to_string()
                };
                if strip(old) == strip(new) {
                    None
                } else {
                    Some(ChangeEntry::value(
                        name,
                        old.as_text().trim(),
                        new.as_text().trim(),
                    ))
                }
            }
            ColumnLabel::PlainDiff => compare_text(
                &name,
                old.as_text().trim().to_string(),
                new.as_text().trim().to_string(),
            ),
        };

        if let Some(entry) = entry {
            set_cell(&mut merged, col, new.clone());
            entries.push(entry);
            changed = true;
        }
    }

    if !changed {
        return Ok(VariationResult::unchanged(base));
    }

    let mut result = VariationResult {
        status,
        merged_row: merged,
        change_log_html: String::new(),
        change_log_plain: String::new(),
        clear_column,
        entries: Vec::new(),
    };
    if !entries.is_empty() {
        let log = ChangeLog {
            header: ChangeHeader {
                user: env.users.display(&task.user),
                at: task.timestamp.unwrap_or(env.now),
                now: env.now,
            },
            entries,
        };
        let rendered = env.renderer.render(&log)?;
        if let (Some(col), false) = (schema.log_history_column, env.discreet) {
            let history = cell_at(&base, col).as_text();
            let combined = if history.trim().is_empty() {
                rendered.plain.clone()
            } else {
                format!("{}\n{}", rendered.plain, history)
            };
            set_cell(&mut result.merged_row, col, Cell::from(combined));
        }
        result.change_log_html = rendered.html;
        result.change_log_plain = rendered.plain;
        result.entries = log.entries;
    }
    Ok(result)
}

/// Cell-for-cell equality of the textual values; trailing blanks ignored.
fn rows_identical(a: &Row, b: &Row) -> bool {
    (0..a.len().max(b.len())).all(|col| cell_at(a, col).as_text() == cell_at(b, col).as_text())
}

fn column_name(header: &[String], col: usize) -> String {
    match header.get(col) {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => column_letter(col),
    }
}

fn stamp(cell: &Cell, format: &str) -> String {
    match cell.as_date() {
        Some(d) => d.format(format).to_string(),
        None => cell.as_text().trim().to_string(),
    }
}

fn display_user(users: &UserDirectory, cell: &Cell) -> String {
    if cell.is_empty() {
        String::new()
    } else {
        users.display(&cell.as_text())
    }
}

fn compare_text(name: &str, old: String, new: String) -> Option<ChangeEntry> {
    (old != new).then(|| ChangeEntry::value(name, old, new))
}

fn compare_file(name: &str, old: &Cell, new: &Cell) -> Option<ChangeEntry> {
    let kind = match (old.is_empty(), new.is_empty()) {
        (true, true) => return None,
        (true, false) => ChangeKind::Uploaded,
        (false, true) => ChangeKind::Deleted,
        (false, false) if old.as_text().trim() == new.as_text().trim() => return None,
        (false, false) => ChangeKind::Changed,
    };
    Some(ChangeEntry::file(name, kind))
}
