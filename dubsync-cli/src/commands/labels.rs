//! `dubsync labels [<table>]`

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dubsync_core::{LabelRegistry, TableName, TableSchema};

#[derive(Args, Debug)]
pub struct LabelsArgs {
    /// Show every column of one table instead of the registry overview.
    pub table: Option<String>,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "table")]
    table: String,
    #[tabled(rename = "split")]
    split: bool,
    #[tabled(rename = "labels")]
    labels: String,
}

#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "column")]
    column: String,
    #[tabled(rename = "label")]
    label: String,
    #[tabled(rename = "role")]
    role: String,
}

impl LabelsArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let registry = LabelRegistry::load_at(&home).context("failed to load label registry")?;

        let Some(table) = self.table else {
            if registry.is_empty() {
                println!("No labelled tables. Add YAML files under ~/.dubsync/labels/.");
                return Ok(());
            }
            let rows: Vec<SchemaRow> = registry
                .tables()
                .into_iter()
                .filter_map(|name| registry.get(name))
                .map(|schema| SchemaRow {
                    table: schema.table.to_string(),
                    split: schema.split,
                    labels: schema
                        .labels
                        .iter()
                        .map(|l| l.code())
                        .collect::<Vec<_>>()
                        .join(" "),
                })
                .collect();
            let mut out = Table::new(rows);
            out.with(Style::rounded());
            println!("{out}");
            return Ok(());
        };

        let name = TableName::from(table.as_str());
        let Some(schema) = registry.get(&name) else {
            bail!("no labels for table '{table}' (unlabelled tables are diffed as plain text)");
        };
        println!(
            "{} {}",
            schema.table.to_string().bold(),
            if schema.split { "(split: active/archive)" } else { "" }
        );
        let mut out = Table::new(column_rows(schema));
        out.with(Style::rounded());
        println!("{out}");
        Ok(())
    }
}

fn column_rows(schema: &TableSchema) -> Vec<ColumnRow> {
    (0..schema.labels.len())
        .map(|col| {
            let mut roles = Vec::new();
            if schema.last_changed_column == Some(col) {
                roles.push("last changed");
            }
            if schema.log_history_column == Some(col) {
                roles.push("log history");
            }
            if schema.parent_key_column == Some(col) {
                roles.push("parent key");
            }
            if schema.status_column == Some(col) {
                roles.push("status");
            }
            ColumnRow {
                column: dubsync_core::types::column_letter(col),
                label: schema.label(col).code(),
                role: roles.join(", "),
            }
        })
        .collect()
}
