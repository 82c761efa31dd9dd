//! Migrate sink: JSON rows into column store tables

use super::{BatchSink, WriteOutcome};
use crate::clickhouse::{ColumnStore, Row};
use crate::schema::{
    sanitize_column_name, ReconcileOptions, SchemaReconciler, TableSchema, TIME_COLUMN,
};
use crate::{Record, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Writes each batch as one insert into the table named after the entity
pub struct ColumnSink<C> {
    store: C,
    reconciler: SchemaReconciler,
    warned_tables: HashSet<String>,
    warned_columns: HashSet<(String, String)>,
}

impl<C: ColumnStore> ColumnSink<C> {
    pub fn new(store: C, reconciler: SchemaReconciler) -> Self {
        Self {
            store,
            reconciler,
            warned_tables: HashSet::new(),
            warned_columns: HashSet::new(),
        }
    }

    /// Fetch the target schema and build a sink around it
    pub async fn connect(store: C, options: ReconcileOptions) -> Result<Self> {
        let mut reconciler = SchemaReconciler::new(options);
        reconciler.refresh(&store).await?;
        Ok(Self::new(store, reconciler))
    }

    pub fn store(&self) -> &C {
        &self.store
    }
}

#[async_trait]
impl<C: ColumnStore> BatchSink for ColumnSink<C> {
    async fn begin_entity(&mut self, entity: &str, first: &Record) -> Result<()> {
        self.reconciler.prepare(&self.store, entity, first).await
    }

    async fn write_batch(&mut self, entity: &str, batch: &[Record]) -> Result<WriteOutcome> {
        let Some(schema) = self.reconciler.table(entity)? else {
            if self.warned_tables.insert(entity.to_string()) {
                warn!(table = entity, "table does not exist, skipping its rows");
            }
            return Ok(WriteOutcome::Skipped(format!("table {} does not exist", entity)));
        };

        let mut unknown = BTreeSet::new();
        let rows = to_rows(schema, batch, &mut unknown);
        for column in unknown {
            if self.warned_columns.insert((entity.to_string(), column.clone())) {
                warn!(table = entity, column = %column, "column not in table, dropping its values");
            }
        }

        Ok(self.store.insert(entity, &schema.names(), &rows).await)
    }
}

/// Lay records out against `schema`, default-filling absent columns
///
/// Record keys with no matching column are collected into `unknown`.
pub fn to_rows(schema: &TableSchema, batch: &[Record], unknown: &mut BTreeSet<String>) -> Vec<Row> {
    batch
        .iter()
        .map(|record| {
            let mut values: HashMap<String, Value> =
                HashMap::with_capacity(record.tags.len() + record.fields.len() + 1);
            for (key, value) in &record.tags {
                values.insert(sanitize_column_name(key), Value::String(value.clone()));
            }
            for (key, value) in record.fields.iter() {
                values.insert(sanitize_column_name(key), value.to_json());
            }
            values.insert(TIME_COLUMN.to_string(), Value::from(record.timestamp));

            let mut row = Row::new();
            for (name, kind) in schema.iter() {
                let value = values.remove(name).unwrap_or_else(|| kind.default_value());
                row.insert(name.to_string(), value);
            }
            unknown.extend(values.into_keys());
            row
        })
        .collect()
}
