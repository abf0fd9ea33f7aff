//! Shared fixtures for unit tests: an in-memory workspace with a manual clock.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use dubsync_core::task::QUEUE_HEADER;
use dubsync_core::types::text_row;
use dubsync_core::{
    ColumnLabel, Config, LabelRegistry, MemoryPropertyStore, MemoryTableStore, Row, Table,
    TableRef, TableSchema, Task,
};

use crate::audit::AUDIT_HEADER;
use crate::clock::ManualClock;
use crate::context::RunContext;
use crate::continuation::FileContinuations;
use crate::workspace::Workspace;

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 5, 4)
        .and_then(|d| d.and_hms_opt(h, m, 0))
        .unwrap()
}

pub fn dwo_header() -> Vec<String> {
    ["Key", "Title", "Status", "Modified", "Log"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn dwo_schema() -> TableSchema {
    TableSchema {
        split: true,
        labels: vec![
            ColumnLabel::Key,
            ColumnLabel::PlainDiff,
            ColumnLabel::PlainDiff,
            ColumnLabel::DateTime,
            ColumnLabel::PlainDiff,
        ],
        last_changed_column: Some(3),
        log_history_column: Some(4),
        status_column: Some(2),
        ..TableSchema::fallback("DWO")
    }
}

pub fn role_header() -> Vec<String> {
    [
        "Key", "Parent", "Actor", "Due", "Script", "Note", "Modified", "Log",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn role_schema() -> TableSchema {
    TableSchema {
        split: true,
        labels: vec![
            ColumnLabel::Key,
            ColumnLabel::PlainDiff,
            ColumnLabel::UserRef,
            ColumnLabel::DateOnly,
            ColumnLabel::FileRef,
            ColumnLabel::Comment,
            ColumnLabel::DateTime,
            ColumnLabel::PlainDiff,
        ],
        last_changed_column: Some(6),
        log_history_column: Some(7),
        parent_key_column: Some(1),
        ..TableSchema::fallback("Role")
    }
}

pub struct Fixture {
    pub home: TempDir,
    pub tables: Arc<MemoryTableStore>,
    pub props: Arc<MemoryPropertyStore>,
    pub clock: Arc<ManualClock>,
    pub ws: Workspace,
}

impl Fixture {
    /// Scaffold config; empty queue, audit log and DWO/Role tables in
    /// `prod`, `live` and `archive`.
    pub fn new() -> Self {
        let home = TempDir::new().unwrap();
        let config = Config::scaffold();
        let tables = Arc::new(MemoryTableStore::new());
        let props = Arc::new(MemoryPropertyStore::new());
        let clock = Arc::new(ManualClock::new(at(9, 0)));

        let header = |cols: &[&str]| cols.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        tables.insert_table(config.queue.clone(), Table::new(header(QUEUE_HEADER)));
        tables.insert_table(config.audit_log.clone(), Table::new(header(AUDIT_HEADER)));
        for dataset in ["prod", "live", "archive"] {
            tables.insert_table(TableRef::new(dataset, "DWO"), Table::new(dwo_header()));
            tables.insert_table(TableRef::new(dataset, "Role"), Table::new(role_header()));
        }

        let continuations = Arc::new(FileContinuations::open_at(home.path(), clock.clone()));
        let ws = Workspace::new(
            home.path(),
            config,
            tables.clone(),
            props.clone(),
            continuations,
            clock.clone(),
        );
        Self {
            home,
            tables,
            props,
            clock,
            ws,
        }
    }

    pub fn ctx(&self) -> RunContext {
        self.ctx_with(|_| {})
    }

    /// Context over a tweaked copy of the config.
    pub fn ctx_with(&self, tweak: impl FnOnce(&mut Config)) -> RunContext {
        let mut ws = self.ws.clone();
        tweak(Arc::make_mut(&mut ws.config));
        let registry = LabelRegistry::from_schemas(vec![dwo_schema(), role_schema()]);
        RunContext::with_registry(ws, registry).unwrap()
    }

    pub fn push(&self, table: &str, dataset: &str, row: Row) {
        let table = TableRef::new(dataset, table);
        let mut contents = self.tables.table(&table).unwrap();
        contents.rows.push(row);
        self.tables.insert_table(table, contents);
    }

    pub fn enqueue(&self, task: &Task) {
        let queue = self.ws.config.queue.clone();
        let mut contents = self.tables.table(&queue).unwrap();
        contents.rows.push(task.to_row());
        self.tables.insert_table(queue, contents);
    }

    pub fn queue(&self) -> Vec<Task> {
        self.tables
            .table(&self.ws.config.queue)
            .unwrap()
            .rows
            .iter()
            .map(|r| Task::from_row(r).unwrap())
            .collect()
    }

    pub fn rows(&self, dataset: &str, table: &str) -> Vec<Row> {
        self.tables.table(&TableRef::new(dataset, table)).unwrap().rows
    }
}

pub fn dwo(key: &str, title: &str, status: &str) -> Row {
    text_row(&[key, title, status, "2026-05-01 08:00:00", ""])
}

pub fn role(key: &str, parent: &str, note: &str) -> Row {
    text_row(&[
        key,
        parent,
        "leo@studio.test",
        "2026-05-10",
        "",
        note,
        "2026-05-01 08:00:00",
        "",
    ])
}
