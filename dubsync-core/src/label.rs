//! Per-column semantic labels.
//!
//! Labels are authored as short action codes in the label registry YAML:
//!
//! | Code        | Label                         |
//! |-------------|-------------------------------|
//! | `K`         | [`ColumnLabel::Key`]          |
//! | `!`         | [`ColumnLabel::Skip`]         |
//! | `D`         | [`ColumnLabel::DateOnly`]     |
//! | `T`         | [`ColumnLabel::DateTime`]     |
//! | `@`         | [`ColumnLabel::UserRef`]      |
//! | `F`         | [`ColumnLabel::FileRef`]      |
//! | `C`         | [`ColumnLabel::Comment`]      |
//! | `:<suffix>` | [`ColumnLabel::SuffixStrip`]  |
//! | `=` / empty | [`ColumnLabel::PlainDiff`]    |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::TableName;

/// How a column is compared and rendered during diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnLabel {
    Key,
    Skip,
    DateOnly,
    DateTime,
    UserRef,
    FileRef,
    Comment,
    SuffixStrip(String),
    #[default]
    PlainDiff,
}

impl ColumnLabel {
    pub fn code(&self) -> String {
        match self {
            ColumnLabel::Key => "K".to_string(),
            ColumnLabel::Skip => "!".to_string(),
            ColumnLabel::DateOnly => "D".to_string(),
            ColumnLabel::DateTime => "T".to_string(),
            ColumnLabel::UserRef => "@".to_string(),
            ColumnLabel::FileRef => "F".to_string(),
            ColumnLabel::Comment => "C".to_string(),
            ColumnLabel::SuffixStrip(suffix) => format!(":{suffix}"),
            ColumnLabel::PlainDiff => "=".to_string(),
        }
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for ColumnLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if let Some(suffix) = code.strip_prefix(':') {
            if suffix.is_empty() {
                return Err(CoreError::InvalidLabel {
                    code: code.to_string(),
                });
            }
            return Ok(ColumnLabel::SuffixStrip(suffix.to_string()));
        }
        match code {
            "K" | "k" => Ok(ColumnLabel::Key),
            "!" => Ok(ColumnLabel::Skip),
            "D" | "d" => Ok(ColumnLabel::DateOnly),
            "T" | "t" => Ok(ColumnLabel::DateTime),
            "@" => Ok(ColumnLabel::UserRef),
            "F" | "f" => Ok(ColumnLabel::FileRef),
            "C" | "c" => Ok(ColumnLabel::Comment),
            "" | "=" => Ok(ColumnLabel::PlainDiff),
            other => Err(CoreError::InvalidLabel {
                code: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ColumnLabel {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnLabel> for String {
    fn from(label: ColumnLabel) -> Self {
        label.code()
    }
}

/// Label registry entry for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableName,
    /// Rows are routed between the active and archival replicas.
    #[serde(default)]
    pub split: bool,
    pub labels: Vec<ColumnLabel>,
    /// "Last changed" timestamp column, compared at datetime precision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_column: Option<usize>,
    /// Running change-log history column on the witness side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_history_column: Option<usize>,
    /// Column holding the owning aggregate's key (child tables).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key_column: Option<usize>,
    /// Column holding the aggregate's workflow status (aggregate table).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_column: Option<usize>,
}

impl TableSchema {
    /// Schema used when a table has no registry entry: key in column 0,
    /// every other column opaque plain-diff.
    pub fn fallback(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            split: false,
            labels: Vec::new(),
            last_changed_column: None,
            log_history_column: None,
            parent_key_column: None,
            status_column: None,
        }
    }

    /// Index of the key column (0 when the schema carries no labels).
    pub fn key_column(&self) -> usize {
        self.labels
            .iter()
            .position(|l| *l == ColumnLabel::Key)
            .unwrap_or(0)
    }

    /// Label for column `col`; columns past the label list are plain-diff.
    pub fn label(&self, col: usize) -> &ColumnLabel {
        static PLAIN: ColumnLabel = ColumnLabel::PlainDiff;
        self.labels.get(col).unwrap_or(&PLAIN)
    }

    /// Exactly one `Key` column, and bookkeeping columns never point at it.
    pub fn validate(&self) -> Result<(), CoreError> {
        let keys = self
            .labels
            .iter()
            .filter(|l| **l == ColumnLabel::Key)
            .count();
        if keys != 1 {
            return Err(CoreError::InvalidSchema {
                table: self.table.0.clone(),
                reason: format!("expected exactly one key column, found {keys}"),
            });
        }
        let key = self.key_column();
        for (name, col) in [
            ("last_changed_column", self.last_changed_column),
            ("log_history_column", self.log_history_column),
            ("parent_key_column", self.parent_key_column),
            ("status_column", self.status_column),
        ] {
            if col == Some(key) {
                return Err(CoreError::InvalidSchema {
                    table: self.table.0.clone(),
                    reason: format!("{name} must not be the key column"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_to_labels() {
        assert_eq!("K".parse::<ColumnLabel>().unwrap(), ColumnLabel::Key);
        assert_eq!("@".parse::<ColumnLabel>().unwrap(), ColumnLabel::UserRef);
        assert_eq!(
            ":-ES".parse::<ColumnLabel>().unwrap(),
            ColumnLabel::SuffixStrip("-ES".to_string())
        );
        assert_eq!("".parse::<ColumnLabel>().unwrap(), ColumnLabel::PlainDiff);
        assert!(matches!(
            "?".parse::<ColumnLabel>(),
            Err(CoreError::InvalidLabel { .. })
        ));
        assert!(":".parse::<ColumnLabel>().is_err());
    }

    #[test]
    fn labels_serialize_as_codes() {
        let labels = vec![
            ColumnLabel::Key,
            ColumnLabel::SuffixStrip(" (v2)".to_string()),
            ColumnLabel::PlainDiff,
        ];
        let yaml = serde_yaml::to_string(&labels).unwrap();
        let back: Vec<ColumnLabel> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, labels);
    }

    #[test]
    fn validate_requires_single_key() {
        let mut schema = TableSchema::fallback("Role");
        assert!(schema.validate().is_err());
        schema.labels = vec![ColumnLabel::Key, ColumnLabel::Key];
        assert!(schema.validate().is_err());
        schema.labels = vec![ColumnLabel::PlainDiff, ColumnLabel::Key];
        assert!(schema.validate().is_ok());
        assert_eq!(schema.key_column(), 1);
    }

    #[test]
    fn validate_rejects_bookkeeping_on_key() {
        let schema = TableSchema {
            log_history_column: Some(0),
            labels: vec![ColumnLabel::Key],
            ..TableSchema::fallback("Role")
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn label_defaults_to_plain_diff() {
        let schema = TableSchema::fallback("Role");
        assert_eq!(schema.key_column(), 0);
        assert_eq!(schema.label(7), &ColumnLabel::PlainDiff);
    }
}
