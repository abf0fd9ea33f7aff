//! Record loader: which table is the source of a task and which replica is
//! its witness.
//!
//! | Table                     | Witness                                           |
//! |---------------------------|---------------------------------------------------|
//! | not `split`               | active dataset                                    |
//! | `split`, root aggregate   | active if its active row is "on track", else the  |
//! |                           | archive when it holds the key, else active        |
//! | `split`, child            | active if the parent key is blank or still in the |
//! |                           | active root table, else archive                   |

use dubsync_core::types::cell_at;
use dubsync_core::{CoreError, DatasetId, EnvName, Row, TableName, TableRef, TableSchema};

use crate::context::RunContext;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replica {
    Active,
    Archive,
}

/// Everything the diff engine needs for one task.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub schema: TableSchema,
    pub source: TableRef,
    pub witness: TableRef,
    pub replica: Replica,
    pub source_row: Option<(usize, Row)>,
    pub witness_row: Option<(usize, Row)>,
    /// Witness column names, for change-log entries.
    pub header: Vec<String>,
}

/// Resolves tasks, remembering the last `(originEnv, table)` lookup.
#[derive(Debug, Default)]
pub struct RecordLoader {
    last: Option<((EnvName, TableName), (DatasetId, TableSchema))>,
    hits: usize,
}

impl RecordLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups served by the last-pair cache.
    pub fn cache_hits(&self) -> usize {
        self.hits
    }

    pub fn resolve(
        &mut self,
        ctx: &mut RunContext,
        env: &EnvName,
        table: &TableName,
        key: &str,
    ) -> Result<Resolution, SyncError> {
        let (dataset, schema) = self.lookup(ctx, env, table)?;
        let key_column = schema.key_column();

        let source = TableRef {
            dataset,
            table: table.clone(),
        };
        let source_row = ctx.find_row(&source, key_column, key)?;

        let replica = route(ctx, &schema, key, source_row.as_ref().map(|(_, row)| row))?;
        let config = ctx.ws.config.clone();
        let witness = TableRef {
            dataset: match replica {
                Replica::Active => config.active_dataset.clone(),
                Replica::Archive => config.archive_dataset.clone(),
            },
            table: table.clone(),
        };
        let witness_row = ctx.find_row(&witness, key_column, key)?;
        let header = ctx.table(&witness)?.header.clone();

        tracing::debug!(
            "resolved {table}/{key}: source {source}, witness {witness} ({replica:?})"
        );
        Ok(Resolution {
            schema,
            source,
            witness,
            replica,
            source_row,
            witness_row,
            header,
        })
    }

    fn lookup(
        &mut self,
        ctx: &mut RunContext,
        env: &EnvName,
        table: &TableName,
    ) -> Result<(DatasetId, TableSchema), SyncError> {
        if let Some(((last_env, last_table), cached)) = &self.last {
            if last_env == env && last_table == table {
                self.hits += 1;
                return Ok(cached.clone());
            }
        }
        let dataset = ctx
            .config()
            .source_dataset(env)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEnv(env.clone()))?;
        let schema = ctx.schema(table);
        self.last = Some(((env.clone(), table.clone()), (dataset.clone(), schema.clone())));
        Ok((dataset, schema))
    }
}

fn route(
    ctx: &mut RunContext,
    schema: &TableSchema,
    key: &str,
    source_row: Option<&Row>,
) -> Result<Replica, SyncError> {
    if !schema.split {
        return Ok(Replica::Active);
    }
    let config = ctx.ws.config.clone();
    let key_column = schema.key_column();

    if schema.table == config.root_table {
        let active = TableRef::new(config.active_dataset.clone(), schema.table.clone());
        if let Some((_, row)) = find_if_present(ctx, &active, key_column, key)? {
            let on_track = schema.status_column.is_some_and(|col| {
                cell_at(&row, col)
                    .as_text()
                    .trim()
                    .eq_ignore_ascii_case(config.active_status.trim())
            });
            if on_track {
                return Ok(Replica::Active);
            }
        }
        let archive = TableRef::new(config.archive_dataset.clone(), schema.table.clone());
        if find_if_present(ctx, &archive, key_column, key)?.is_some() {
            return Ok(Replica::Archive);
        }
        return Ok(Replica::Active);
    }

    let parent = match (schema.parent_key_column, source_row) {
        (Some(col), Some(row)) => cell_at(row, col).as_text().trim().to_string(),
        _ => String::new(),
    };
    if parent.is_empty() {
        return Ok(Replica::Active);
    }
    let root_key = ctx.schema(&config.root_table).key_column();
    let root = TableRef::new(config.active_dataset.clone(), config.root_table.clone());
    if find_if_present(ctx, &root, root_key, &parent)?.is_some() {
        Ok(Replica::Active)
    } else {
        Ok(Replica::Archive)
    }
}

/// Like [`RunContext::find_row`], but a table that does not exist holds no keys.
fn find_if_present(
    ctx: &mut RunContext,
    table: &TableRef,
    key_column: usize,
    key: &str,
) -> Result<Option<(usize, Row)>, SyncError> {
    match ctx.find_row(table, key_column, key) {
        Err(SyncError::Core(CoreError::UnknownTable(_))) => Ok(None),
        other => other,
    }
}
