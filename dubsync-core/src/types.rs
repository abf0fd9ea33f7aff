//! Domain types for spreadsheet-backed tables.
//!
//! A *dataset* is one spreadsheet (a replica or an origin environment); a
//! *table* is one sheet inside it. Rows are addressed by 0-based data row
//! index; the header row is kept separately.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub use crate::task::{StatusCode, Task, TaskAction};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one dataset (spreadsheet) holding a set of tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatasetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatasetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a table (sheet) inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(pub String);

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of the environment a change originated from (maps to a source dataset).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvName(pub String);

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EnvName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EnvName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Fully-qualified address of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: DatasetId,
    pub table: TableName,
}

impl TableRef {
    pub fn new(dataset: impl Into<DatasetId>, table: impl Into<TableName>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.table)
    }
}

// ---------------------------------------------------------------------------
// Cells and rows
// ---------------------------------------------------------------------------

/// Text formats accepted when a date arrives as a plain string cell.
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// One spreadsheet cell.
///
/// Serialised untagged except for dates, which are written as
/// `{"date": "…"}` so that text shaped like a timestamp stays text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    #[serde(with = "tagged_date")]
    Date(NaiveDateTime),
    Text(String),
}

mod tagged_date {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        date: NaiveDateTime,
    }

    pub fn serialize<S: Serializer>(date: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        Tagged { date: *date }.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        Ok(Tagged::deserialize(d)?.date)
    }
}

impl Cell {
    /// `true` for empty cells and blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display string as a spreadsheet would show it.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Bool(true) => "TRUE".to_string(),
            Cell::Bool(false) => "FALSE".to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Date(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    /// Interpret the cell as a timestamp. Date-only text is read as midnight.
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_date_text(s.trim()),
            _ => None,
        }
    }

    /// Whether this cell holds `key` (trimmed text comparison).
    pub fn matches_key(&self, key: &str) -> bool {
        !self.is_empty() && self.as_text().trim() == key.trim()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_owned())
        }
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s)
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(d: NaiveDateTime) -> Self {
        Cell::Date(d)
    }
}

impl From<Option<NaiveDateTime>> for Cell {
    fn from(d: Option<NaiveDateTime>) -> Self {
        d.map(Cell::Date).unwrap_or_default()
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// One table row.
pub type Row = Vec<Cell>;

/// Build a row from string literals (empty strings become empty cells).
pub fn text_row<S: AsRef<str>>(cells: &[S]) -> Row {
    cells.iter().map(|c| Cell::from(c.as_ref())).collect()
}

/// Read cell `col` of `row`, treating short rows as padded with empty cells.
pub fn cell_at(row: &Row, col: usize) -> &Cell {
    static EMPTY: Cell = Cell::Empty;
    row.get(col).unwrap_or(&EMPTY)
}

/// Overwrite cell `col`, padding the row as needed.
pub fn set_cell(row: &mut Row, col: usize, value: Cell) {
    if row.len() <= col {
        row.resize(col + 1, Cell::Empty);
    }
    row[col] = value;
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A whole table: header plus data rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Index of the first data row whose `key_column` holds `key`.
    pub fn find(&self, key_column: usize, key: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| cell_at(row, key_column).matches_key(key))
    }

    /// Map of key → first row index for `key_column`. Blank keys are skipped.
    pub fn key_index(&self, key_column: usize) -> HashMap<String, usize> {
        let mut index = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            let cell = cell_at(row, key_column);
            if cell.is_empty() {
                continue;
            }
            index.entry(cell.as_text().trim().to_string()).or_insert(i);
        }
        index
    }

    /// Column name for display, falling back to a spreadsheet-style letter.
    pub fn column_name(&self, col: usize) -> String {
        match self.header.get(col) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => column_letter(col),
        }
    }
}

/// `0 → A`, `25 → Z`, `26 → AA`.
pub fn column_letter(col: usize) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(DatasetId::from("live").to_string(), "live");
        assert_eq!(TableName::from("DWO").to_string(), "DWO");
        assert_eq!(TableRef::new("live", "DWO").to_string(), "live/DWO");
    }

    #[test]
    fn cell_text_rendering() {
        assert_eq!(Cell::Number(42.0).as_text(), "42");
        assert_eq!(Cell::Number(1.5).as_text(), "1.5");
        assert_eq!(Cell::Bool(true).as_text(), "TRUE");
        assert_eq!(Cell::Empty.as_text(), "");
    }

    #[test]
    fn cell_parses_dates_from_text() {
        let d = Cell::from("2026-03-01").as_date().expect("date");
        assert_eq!(d.to_string(), "2026-03-01 00:00:00");
        let dt = Cell::from("01/03/2026 14:30").as_date().expect("datetime");
        assert_eq!(dt.to_string(), "2026-03-01 14:30:00");
        assert!(Cell::from("not a date").as_date().is_none());
    }

    #[test]
    fn cell_json_shape_is_untagged() {
        let row: Row = vec![
            Cell::Empty,
            Cell::from("42"),
            Cell::Number(7.0),
            Cell::Bool(false),
        ];
        let json = serde_json::to_string(&row).expect("serialize");
        assert_eq!(json, r#"[null,"42",7.0,false]"#);
        let back: Row = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, row);
    }

    #[test]
    fn timestamp_text_survives_json_as_text() {
        let row: Row = vec![
            Cell::from("2026-05-04T09:30:00"),
            Cell::Date(
                NaiveDate::from_ymd_opt(2026, 5, 4)
                    .and_then(|d| d.and_hms_opt(9, 30, 0))
                    .expect("date"),
            ),
        ];
        let json = serde_json::to_string(&row).expect("serialize");
        assert_eq!(json, r#"["2026-05-04T09:30:00",{"date":"2026-05-04T09:30:00"}]"#);
        let back: Row = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, row);
        assert_eq!(back[0].as_text(), "2026-05-04T09:30:00");
        assert_eq!(back[1].as_text(), "2026-05-04 09:30:00");
    }

    #[test]
    fn key_index_keeps_first_occurrence() {
        let table = Table {
            header: vec!["Key".into()],
            rows: vec![text_row(&["a"]), text_row(&["b"]), text_row(&["a"]), text_row(&[""])],
        };
        let index = table.key_index(0);
        assert_eq!(index.get("a"), Some(&0));
        assert_eq!(index.get("b"), Some(&1));
        assert_eq!(index.len(), 2);
        assert_eq!(table.find(0, " b "), Some(1));
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
    }

    #[test]
    fn set_cell_pads_short_rows() {
        let mut row = text_row(&["a"]);
        set_cell(&mut row, 3, Cell::from("d"));
        assert_eq!(row.len(), 4);
        assert_eq!(cell_at(&row, 2), &Cell::Empty);
        assert_eq!(cell_at(&row, 9), &Cell::Empty);
    }
}
