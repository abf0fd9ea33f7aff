//! Change tasks and their status state machine.
//!
//! ```text
//! Pending ──begin──▶ Retry ──complete(Unchanged | Incorporated | SourceMissedKey)──▶ terminal
//! Pending | Retry ──discard──▶ Discarded
//! Retry ──fail──▶ Retry (attempts + 1)
//! ```
//!
//! Terminal states never regress; every illegal event returns
//! [`CoreError::IllegalTransition`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{cell_at, Cell, EnvName, Row, TableName};

/// Task queue columns, in order.
pub const QUEUE_HEADER: &[&str] = &[
    "Table",
    "Key",
    "Timestamp",
    "OriginEnv",
    "Action",
    "User",
    "Status",
    "ProcessedAtMarker",
    "RetryComment",
    "LogRef",
];

mod col {
    pub const TABLE: usize = 0;
    pub const KEY: usize = 1;
    pub const TIMESTAMP: usize = 2;
    pub const ORIGIN_ENV: usize = 3;
    pub const ACTION: usize = 4;
    pub const USER: usize = 5;
    pub const STATUS: usize = 6;
    pub const PROCESSED_AT: usize = 7;
    pub const RETRY_COMMENT: usize = 8;
    pub const LOG_REF: usize = 9;
}

/// What the upstream change capture observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskAction {
    Insert,
    #[default]
    Edit,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Insert => write!(f, "Insert"),
            TaskAction::Edit => write!(f, "Edit"),
        }
    }
}

impl FromStr for TaskAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(TaskAction::Insert),
            "" | "edit" => Ok(TaskAction::Edit),
            other => Err(CoreError::MalformedTask {
                reason: format!("unknown action '{other}'"),
            }),
        }
    }
}

/// Queue status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StatusCode {
    #[default]
    Pending,
    Retry,
    Incorporated,
    Discarded,
    Unchanged,
    SourceMissedKey,
}

impl StatusCode {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusCode::Incorporated
                | StatusCode::Discarded
                | StatusCode::Unchanged
                | StatusCode::SourceMissedKey
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Pending => "Pending",
            StatusCode::Retry => "Retry",
            StatusCode::Incorporated => "Incorporated",
            StatusCode::Discarded => "Discarded",
            StatusCode::Unchanged => "Unchanged",
            StatusCode::SourceMissedKey => "SourceMissedKey",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pending" => Ok(StatusCode::Pending),
            "retry" => Ok(StatusCode::Retry),
            "incorporated" => Ok(StatusCode::Incorporated),
            "discarded" => Ok(StatusCode::Discarded),
            "unchanged" => Ok(StatusCode::Unchanged),
            "sourcemissedkey" => Ok(StatusCode::SourceMissedKey),
            other => Err(CoreError::MalformedTask {
                reason: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// One queued change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub table: TableName,
    pub key: String,
    pub timestamp: Option<NaiveDateTime>,
    pub origin_env: EnvName,
    pub action: TaskAction,
    pub user: String,
    pub status: StatusCode,
    pub processed_at: Option<NaiveDateTime>,
    /// Failed attempts so far; only grows.
    pub attempts: u32,
    /// Last captured failure message.
    pub retry_comment: String,
    /// Audit log reference written when the task reached a terminal state.
    pub log_ref: String,
}

impl Task {
    pub fn new(
        table: impl Into<TableName>,
        key: impl Into<String>,
        origin_env: impl Into<EnvName>,
        action: TaskAction,
        user: impl Into<String>,
        timestamp: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            timestamp,
            origin_env: origin_env.into(),
            action,
            user: user.into(),
            status: StatusCode::Pending,
            processed_at: None,
            attempts: 0,
            retry_comment: String::new(),
            log_ref: String::new(),
        }
    }

    /// `(table, key)` identity used for adjacent-duplicate collapsing.
    pub fn identity(&self) -> (&str, &str) {
        (self.table.0.as_str(), self.key.trim())
    }

    /// `originEnv/table/key`, the in-batch append guard key.
    pub fn staging_key(&self) -> String {
        format!("{}/{}/{}", self.origin_env, self.table, self.key.trim())
    }

    /// Pending | Retry → Retry.
    pub fn begin(&mut self) -> Result<(), CoreError> {
        match self.status {
            StatusCode::Pending | StatusCode::Retry => {
                self.status = StatusCode::Retry;
                Ok(())
            }
            from => Err(CoreError::IllegalTransition {
                from,
                event: "begin",
            }),
        }
    }

    /// Retry → terminal outcome.
    pub fn complete(&mut self, outcome: StatusCode, at: NaiveDateTime) -> Result<(), CoreError> {
        if self.status != StatusCode::Retry || !outcome.is_terminal() {
            return Err(CoreError::IllegalTransition {
                from: self.status,
                event: "complete",
            });
        }
        self.status = outcome;
        self.processed_at = Some(at);
        Ok(())
    }

    /// Pending | Retry → Discarded.
    pub fn discard(&mut self, at: NaiveDateTime, reason: &str) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::IllegalTransition {
                from: self.status,
                event: "discard",
            });
        }
        self.status = StatusCode::Discarded;
        self.processed_at = Some(at);
        self.retry_comment = reason.to_string();
        Ok(())
    }

    /// Retry → Retry with one more attempt and the captured message.
    pub fn fail(&mut self, message: &str) -> Result<(), CoreError> {
        if self.status != StatusCode::Retry {
            return Err(CoreError::IllegalTransition {
                from: self.status,
                event: "fail",
            });
        }
        self.attempts += 1;
        self.retry_comment = message.to_string();
        Ok(())
    }

    /// Parse a queue row. Short rows are padded; unknown status/action are errors.
    pub fn from_row(row: &Row) -> Result<Self, CoreError> {
        let table = cell_at(row, col::TABLE).as_text().trim().to_string();
        if table.is_empty() {
            return Err(CoreError::MalformedTask {
                reason: "missing table name".to_string(),
            });
        }
        let (attempts, retry_comment) =
            split_retry_comment(&cell_at(row, col::RETRY_COMMENT).as_text());
        Ok(Self {
            table: TableName(table),
            key: cell_at(row, col::KEY).as_text().trim().to_string(),
            timestamp: cell_at(row, col::TIMESTAMP).as_date(),
            origin_env: EnvName(cell_at(row, col::ORIGIN_ENV).as_text().trim().to_string()),
            action: cell_at(row, col::ACTION).as_text().parse()?,
            user: cell_at(row, col::USER).as_text(),
            status: cell_at(row, col::STATUS).as_text().parse()?,
            processed_at: cell_at(row, col::PROCESSED_AT).as_date(),
            attempts,
            retry_comment,
            log_ref: cell_at(row, col::LOG_REF).as_text(),
        })
    }

    /// Serialize to the queue column layout.
    pub fn to_row(&self) -> Row {
        let retry = if self.attempts > 0 {
            format!("#{} {}", self.attempts, self.retry_comment)
                .trim_end()
                .to_string()
        } else {
            self.retry_comment.clone()
        };
        vec![
            Cell::from(self.table.0.as_str()),
            Cell::from(self.key.as_str()),
            Cell::from(self.timestamp),
            Cell::from(self.origin_env.0.as_str()),
            Cell::from(self.action.to_string()),
            Cell::from(self.user.as_str()),
            Cell::from(self.status.as_str()),
            Cell::from(self.processed_at),
            Cell::from(retry),
            Cell::from(self.log_ref.as_str()),
        ]
    }
}

/// `"#3 timeout"` → `(3, "timeout")`; comments without a counter → `(0, comment)`.
fn split_retry_comment(raw: &str) -> (u32, String) {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('#') {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse::<u32>() {
            return (n, rest[digits.len()..].trim().to_string());
        }
    }
    (0, raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
    }

    fn task() -> Task {
        Task::new("Episode", "E-7", "prod", TaskAction::Edit, "u1", Some(at()))
    }

    #[test]
    fn happy_path_transitions() {
        let mut t = task();
        t.begin().unwrap();
        assert_eq!(t.status, StatusCode::Retry);
        t.complete(StatusCode::Incorporated, at()).unwrap();
        assert_eq!(t.status, StatusCode::Incorporated);
        assert_eq!(t.processed_at, Some(at()));
    }

    #[test]
    fn terminal_states_never_regress() {
        let mut t = task();
        t.begin().unwrap();
        t.complete(StatusCode::Unchanged, at()).unwrap();
        assert!(matches!(
            t.begin(),
            Err(CoreError::IllegalTransition { event: "begin", .. })
        ));
        assert!(t.discard(at(), "dup").is_err());
        assert!(t.fail("boom").is_err());
        assert_eq!(t.status, StatusCode::Unchanged);
    }

    #[test]
    fn complete_requires_terminal_outcome() {
        let mut t = task();
        t.begin().unwrap();
        assert!(t.complete(StatusCode::Pending, at()).is_err());
        assert!(task().complete(StatusCode::Unchanged, at()).is_err());
    }

    #[test]
    fn failure_increments_attempts_monotonically() {
        let mut t = task();
        t.begin().unwrap();
        t.fail("first").unwrap();
        t.begin().unwrap();
        t.fail("second").unwrap();
        assert_eq!(t.attempts, 2);
        assert_eq!(t.retry_comment, "second");
        assert_eq!(t.status, StatusCode::Retry);
    }

    #[test]
    fn queue_row_roundtrip_keeps_attempts() {
        let mut t = task();
        t.begin().unwrap();
        t.fail("table unreachable").unwrap();
        let row = t.to_row();
        assert_eq!(row[8], Cell::from("#1 table unreachable"));
        let back = Task::from_row(&row).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn short_rows_default_to_pending_edit() {
        let row = crate::types::text_row(&["DWO", "42"]);
        let t = Task::from_row(&row).unwrap();
        assert_eq!(t.status, StatusCode::Pending);
        assert_eq!(t.action, TaskAction::Edit);
        assert_eq!(t.attempts, 0);
    }

    #[test]
    fn unknown_status_is_malformed() {
        let row = crate::types::text_row(&["DWO", "42", "", "prod", "Edit", "u", "Exploded"]);
        assert!(matches!(
            Task::from_row(&row),
            Err(CoreError::MalformedTask { .. })
        ));
    }

    #[test]
    fn staging_key_includes_env() {
        assert_eq!(task().staging_key(), "prod/Episode/E-7");
    }
}
