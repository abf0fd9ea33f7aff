//! Storage seams consumed by the engine.
//!
//! [`TableStore`] addresses spreadsheet-style tables by [`TableRef`];
//! [`PropertyStore`] is the durable key/value store holding the control
//! record and scanner checkpoints. Both take `&self` so one store can be
//! shared by the driver, the scanner and the host without threading `&mut`
//! through every call. The in-memory implementations back the unit tests of
//! every crate in the workspace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::CoreError;
use crate::types::{cell_at, Row, Table, TableRef};

/// Addressable table storage.
pub trait TableStore: Send + Sync {
    /// Column names of `table`. Unknown tables are an error.
    fn header(&self, table: &TableRef) -> Result<Vec<String>, CoreError>;

    /// Every data row (header excluded).
    fn get_all_rows(&self, table: &TableRef) -> Result<Vec<Row>, CoreError>;

    /// Up to `count` rows starting at data row `start`. Reading past the end
    /// returns the rows that exist.
    fn get_row_range(
        &self,
        table: &TableRef,
        start: usize,
        count: usize,
    ) -> Result<Vec<Row>, CoreError>;

    fn append_row(&self, table: &TableRef, row: Row) -> Result<(), CoreError>;

    /// Overwrite `rows.len()` rows starting at `start`; the range must exist.
    fn write_row_range(&self, table: &TableRef, start: usize, rows: Vec<Row>)
        -> Result<(), CoreError>;

    /// Blank `count` rows starting at `start` (rows stay in place).
    fn clear_row_range(&self, table: &TableRef, start: usize, count: usize)
        -> Result<(), CoreError>;

    /// Number of data rows.
    fn row_count(&self, table: &TableRef) -> Result<usize, CoreError> {
        Ok(self.get_all_rows(table)?.len())
    }

    /// First row whose `key_column` holds `key`, with its index.
    fn get_row_by_key(
        &self,
        table: &TableRef,
        key_column: usize,
        key: &str,
    ) -> Result<Option<(usize, Row)>, CoreError> {
        Ok(self
            .get_all_rows(table)?
            .into_iter()
            .enumerate()
            .find(|(_, row)| cell_at(row, key_column).matches_key(key)))
    }
}

/// Durable string key/value storage.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<TableRef, Table>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) `table`.
    pub fn insert_table(&self, table: TableRef, contents: Table) {
        self.lock().insert(table, contents);
    }

    /// Snapshot of `table`, if present.
    pub fn table(&self, table: &TableRef) -> Option<Table> {
        self.lock().get(table).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TableRef, Table>> {
        // A poisoned map is still structurally valid.
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_table<T>(
        &self,
        table: &TableRef,
        f: impl FnOnce(&mut Table) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut tables = self.lock();
        let contents = tables
            .get_mut(table)
            .ok_or_else(|| CoreError::UnknownTable(table.clone()))?;
        f(contents)
    }
}

fn check_range(table: &TableRef, contents: &Table, start: usize, count: usize) -> Result<(), CoreError> {
    let end = start + count;
    if end > contents.rows.len() {
        return Err(CoreError::RowOutOfRange {
            table: table.clone(),
            start,
            end,
            len: contents.rows.len(),
        });
    }
    Ok(())
}

impl TableStore for MemoryTableStore {
    fn header(&self, table: &TableRef) -> Result<Vec<String>, CoreError> {
        self.with_table(table, |t| Ok(t.header.clone()))
    }

    fn get_all_rows(&self, table: &TableRef) -> Result<Vec<Row>, CoreError> {
        self.with_table(table, |t| Ok(t.rows.clone()))
    }

    fn get_row_range(
        &self,
        table: &TableRef,
        start: usize,
        count: usize,
    ) -> Result<Vec<Row>, CoreError> {
        self.with_table(table, |t| {
            Ok(t.rows.iter().skip(start).take(count).cloned().collect())
        })
    }

    fn append_row(&self, table: &TableRef, row: Row) -> Result<(), CoreError> {
        self.with_table(table, |t| {
            t.rows.push(row);
            Ok(())
        })
    }

    fn write_row_range(
        &self,
        table: &TableRef,
        start: usize,
        rows: Vec<Row>,
    ) -> Result<(), CoreError> {
        self.with_table(table, |t| {
            check_range(table, t, start, rows.len())?;
            for (offset, row) in rows.into_iter().enumerate() {
                t.rows[start + offset] = row;
            }
            Ok(())
        })
    }

    fn clear_row_range(&self, table: &TableRef, start: usize, count: usize) -> Result<(), CoreError> {
        self.with_table(table, |t| {
            check_range(table, t, start, count)?;
            for row in &mut t.rows[start..start + count] {
                row.clear();
            }
            Ok(())
        })
    }

    fn row_count(&self, table: &TableRef) -> Result<usize, CoreError> {
        self.with_table(table, |t| Ok(t.rows.len()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::text_row;

    fn store() -> (MemoryTableStore, TableRef) {
        let store = MemoryTableStore::new();
        let table = TableRef::new("live", "Role");
        let mut contents = Table::new(vec!["Key".into(), "Name".into()]);
        contents.rows.push(text_row(&["r1", "Anna"]));
        contents.rows.push(text_row(&["r2", "Boris"]));
        store.insert_table(table.clone(), contents);
        (store, table)
    }

    #[test]
    fn unknown_table_is_an_error() {
        let (store, _) = store();
        let err = store
            .get_all_rows(&TableRef::new("live", "Nope"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownTable(_)));
    }

    #[test]
    fn get_row_by_key_returns_index() {
        let (store, table) = store();
        let (idx, row) = store.get_row_by_key(&table, 0, "r2").unwrap().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(row, text_row(&["r2", "Boris"]));
        assert!(store.get_row_by_key(&table, 0, "r9").unwrap().is_none());
    }

    #[test]
    fn range_reads_clip_at_end() {
        let (store, table) = store();
        assert_eq!(store.get_row_range(&table, 1, 10).unwrap().len(), 1);
        assert!(store.get_row_range(&table, 5, 10).unwrap().is_empty());
    }

    #[test]
    fn writes_outside_table_are_rejected() {
        let (store, table) = store();
        let err = store
            .write_row_range(&table, 2, vec![text_row(&["r3"])])
            .unwrap_err();
        assert!(matches!(err, CoreError::RowOutOfRange { len: 2, .. }));
    }

    #[test]
    fn clear_keeps_row_positions() {
        let (store, table) = store();
        store.clear_row_range(&table, 0, 1).unwrap();
        let rows = store.get_all_rows(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_empty());
    }

    #[test]
    fn properties_set_get_delete() {
        let props = MemoryPropertyStore::new();
        props.set("control", "{}").unwrap();
        assert_eq!(props.get("control").unwrap().as_deref(), Some("{}"));
        props.delete("control").unwrap();
        props.delete("control").unwrap();
        assert!(props.get("control").unwrap().is_none());
    }
}
