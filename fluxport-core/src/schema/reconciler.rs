//! Target table bookkeeping for a migrate run

use super::{drop_statement, TableDefinition, TableSchema};
use crate::clickhouse::{ColumnInfo, ColumnStore};
use crate::config::MigrateConfig;
use crate::{Record, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Table management switches for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Create a missing table from the first record of its entity
    pub auto_create: bool,
    /// Drop the table before loading its entity
    pub auto_drop: bool,
    /// Engine for created tables
    pub engine: String,
}

impl ReconcileOptions {
    pub fn from_config(config: &MigrateConfig) -> Self {
        Self {
            auto_create: config.auto_create,
            auto_drop: config.auto_drop,
            engine: config.engine.clone(),
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            auto_create: false,
            auto_drop: false,
            engine: crate::config::DEFAULT_ENGINE.to_string(),
        }
    }
}

/// Column sets of the target database, fetched once per run
///
/// Declared types are classified the first time a table is loaded into, so an
/// unsupported type in an unrelated table does not stop the run.
#[derive(Debug, Default)]
pub struct SchemaReconciler {
    options: ReconcileOptions,
    declared: HashMap<String, Vec<ColumnInfo>>,
    tables: HashMap<String, TableSchema>,
    prepared: HashSet<String>,
}

impl SchemaReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Seed with already introspected columns
    pub fn with_columns(options: ReconcileOptions, columns: Vec<ColumnInfo>) -> Self {
        let mut reconciler = Self::new(options);
        reconciler.set_columns(columns);
        reconciler
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Fetch the live column set of every table
    pub async fn refresh(&mut self, store: &dyn ColumnStore) -> Result<()> {
        let columns = store.columns().await?;
        self.set_columns(columns);
        info!(tables = self.declared.len(), "fetched target schema");
        Ok(())
    }

    fn set_columns(&mut self, columns: Vec<ColumnInfo>) {
        self.declared.clear();
        self.tables.clear();
        for column in columns {
            self.declared
                .entry(column.table.clone())
                .or_default()
                .push(column);
        }
    }

    /// Whether the table is known to exist
    pub fn has_table(&self, table: &str) -> bool {
        self.declared.contains_key(table) || self.tables.contains_key(table)
    }

    /// Drop and/or create `table` as configured, once per run
    pub async fn prepare(
        &mut self,
        store: &dyn ColumnStore,
        table: &str,
        first: &Record,
    ) -> Result<()> {
        if !self.prepared.insert(table.to_string()) {
            return Ok(());
        }

        if self.options.auto_drop {
            let sql = drop_statement(table);
            info!(table, sql = %sql, "dropping table");
            store.execute(&sql).await?;
            self.declared.remove(table);
            self.tables.remove(table);
        }

        if self.options.auto_create {
            let mut definition = TableDefinition::from_record(first, &self.options.engine);
            definition.name = table.to_string();
            let sql = definition.create_statement(true);
            info!(table, sql = %sql, "creating table");
            store.execute(&sql).await?;

            // An existing table keeps its live columns
            if !self.has_table(table) {
                self.tables.insert(table.to_string(), definition.schema()?);
            }
        }
        Ok(())
    }

    /// Column set of `table`, `None` when the table does not exist
    pub fn table(&mut self, table: &str) -> Result<Option<&TableSchema>> {
        if let Some(columns) = self.declared.remove(table) {
            let schema = TableSchema::from_info(&columns)?;
            debug!(table, columns = schema.len(), "resolved table schema");
            self.tables.insert(table.to_string(), schema);
        }
        Ok(self.tables.get(table))
    }
}
