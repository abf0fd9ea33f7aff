//! Per-run state threaded through driver → loader → diff engine.
//!
//! A [`RunContext`] is built at the start of a run and dropped at its end:
//! label schemas are loaded once, table snapshots are cached per
//! `(dataset, table)` with write-through on every apply, and the in-batch
//! append guard starts empty.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;

use dubsync_core::{
    Config, DatasetId, LabelRegistry, Row, Table, TableName, TableRef, TableSchema, TableStore,
};
use dubsync_render::{template_dir_at, ChangeLogRenderer};

use crate::error::SyncError;
use crate::users::UserDirectory;
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// TableCache
// ---------------------------------------------------------------------------

/// Table snapshots keyed by `(dataset, table)`. No eviction within a run.
#[derive(Debug, Default)]
pub struct TableCache {
    tables: HashMap<(DatasetId, TableName), Table>,
    loads: usize,
}

impl TableCache {
    fn key(table: &TableRef) -> (DatasetId, TableName) {
        (table.dataset.clone(), table.table.clone())
    }

    /// Cached snapshot of `table`, loading it from `store` on first use.
    pub fn get(&mut self, store: &dyn TableStore, table: &TableRef) -> Result<&Table, SyncError> {
        let key = Self::key(table);
        if !self.tables.contains_key(&key) {
            let snapshot = Table {
                header: store.header(table)?,
                rows: store.get_all_rows(table)?,
            };
            self.loads += 1;
            self.tables.insert(key.clone(), snapshot);
        }
        self.tables
            .get(&key)
            .ok_or_else(|| SyncError::Core(dubsync_core::CoreError::UnknownTable(table.clone())))
    }

    pub fn note_append(&mut self, table: &TableRef, row: Row) {
        if let Some(t) = self.tables.get_mut(&Self::key(table)) {
            t.rows.push(row);
        }
    }

    pub fn note_write(&mut self, table: &TableRef, index: usize, row: Row) {
        if let Some(t) = self.tables.get_mut(&Self::key(table)) {
            if let Some(slot) = t.rows.get_mut(index) {
                *slot = row;
            }
        }
    }

    pub fn invalidate(&mut self, table: &TableRef) {
        self.tables.remove(&Self::key(table));
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Store reads performed so far.
    pub fn loads(&self) -> usize {
        self.loads
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

pub struct RunContext {
    pub ws: Workspace,
    pub registry: LabelRegistry,
    pub renderer: ChangeLogRenderer,
    pub users: UserDirectory,
    pub cache: TableCache,
    /// In-batch append guard: `originEnv/table/key` of rows appended this run.
    pub staged: HashSet<String>,
    pub verbose: bool,
    pub discreet: bool,
    warned: HashSet<TableName>,
}

impl RunContext {
    pub fn new(ws: Workspace) -> Result<Self, SyncError> {
        let registry = LabelRegistry::load_at(&ws.home)?;
        Self::with_registry(ws, registry)
    }

    pub fn with_registry(ws: Workspace, registry: LabelRegistry) -> Result<Self, SyncError> {
        let renderer = ChangeLogRenderer::with_overrides(Some(&template_dir_at(&ws.home)))?;
        let users = UserDirectory::new(ws.config.users.clone());
        Ok(Self {
            ws,
            registry,
            renderer,
            users,
            cache: TableCache::default(),
            staged: HashSet::new(),
            verbose: false,
            discreet: false,
            warned: HashSet::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.ws.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.ws.clock.now()
    }

    /// Registered schema for `table`, or the all-plain-diff fallback (warned
    /// once per run).
    pub fn schema(&mut self, table: &TableName) -> TableSchema {
        if let Some(schema) = self.registry.get(table) {
            return schema.clone();
        }
        if self.warned.insert(table.clone()) {
            tracing::warn!(
                "no label registry entry for table {table}; comparing every column as plain text"
            );
        }
        TableSchema::fallback(table.clone())
    }

    pub fn table(&mut self, table: &TableRef) -> Result<&Table, SyncError> {
        self.cache.get(self.ws.tables.as_ref(), table)
    }

    /// First row of `table` holding `key` in `key_column`.
    pub fn find_row(
        &mut self,
        table: &TableRef,
        key_column: usize,
        key: &str,
    ) -> Result<Option<(usize, Row)>, SyncError> {
        let snapshot = self.table(table)?;
        Ok(snapshot
            .find(key_column, key)
            .map(|i| (i, snapshot.rows[i].clone())))
    }

    /// Append through to the store and the cache. Returns the new row index.
    pub fn append_row(&mut self, table: &TableRef, row: Row) -> Result<usize, SyncError> {
        let index = self.table(table)?.rows.len();
        self.ws.tables.append_row(table, row.clone())?;
        self.cache.note_append(table, row);
        Ok(index)
    }

    /// Overwrite one row through to the store and the cache.
    pub fn write_row(&mut self, table: &TableRef, index: usize, row: Row) -> Result<(), SyncError> {
        self.ws
            .tables
            .write_row_range(table, index, vec![row.clone()])?;
        self.cache.note_write(table, index, row);
        Ok(())
    }

    /// Drop per-run state so the context can serve another run.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.staged.clear();
        self.warned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubsync_core::types::text_row;
    use dubsync_core::MemoryTableStore;

    fn store() -> MemoryTableStore {
        let store = MemoryTableStore::new();
        let mut t = Table::new(vec!["Key".into()]);
        t.rows.push(text_row(&["a"]));
        store.insert_table(TableRef::new("live", "Role"), t);
        store
    }

    #[test]
    fn cache_loads_each_table_once() {
        let store = store();
        let mut cache = TableCache::default();
        let table = TableRef::new("live", "Role");
        cache.get(&store, &table).unwrap();
        cache.get(&store, &table).unwrap();
        assert_eq!(cache.loads(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_is_keyed_by_dataset_and_table() {
        let store = store();
        store.insert_table(TableRef::new("archive", "Role"), Table::new(vec!["Key".into()]));
        let mut cache = TableCache::default();
        assert_eq!(cache.get(&store, &TableRef::new("live", "Role")).unwrap().rows.len(), 1);
        assert!(cache.get(&store, &TableRef::new("archive", "Role")).unwrap().rows.is_empty());
        assert_eq!(cache.loads(), 2);
    }

    #[test]
    fn write_through_updates_snapshot() {
        let store = store();
        let mut cache = TableCache::default();
        let table = TableRef::new("live", "Role");
        cache.get(&store, &table).unwrap();
        cache.note_append(&table, text_row(&["b"]));
        cache.note_write(&table, 0, text_row(&["A"]));
        let snapshot = cache.get(&store, &table).unwrap();
        assert_eq!(snapshot.rows, vec![text_row(&["A"]), text_row(&["b"])]);
    }
}
