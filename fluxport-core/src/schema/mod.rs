//! Typed column model for the column store
//!
//! A [`TableDefinition`] is what we create; a [`TableSchema`] is what we load
//! rows against. Declared types are reduced to a [`ColumnKind`], which is all
//! the loader needs to fill in missing values.

mod generator;
mod reconciler;

pub use generator::generate_definitions;
pub use reconciler::{ReconcileOptions, SchemaReconciler};

use crate::clickhouse::{quote_column, ColumnInfo};
use crate::source::FieldSchema;
use crate::{FieldType, FieldValue, PortError, Record, Result};
use serde_json::Value;

/// Name of the timestamp column in every table
pub const TIME_COLUMN: &str = "time";

/// Time column type used for auto-created tables
pub const AUTO_TIME_TYPE: &str = "DateTime64(0)";

/// Compression codec applied to the time column
pub const TIME_CODEC: &str = "CODEC(DoubleDelta)";

/// Column names may not contain `-`
pub fn sanitize_column_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Value class of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
}

impl ColumnKind {
    /// Classify a declared type such as `LowCardinality(String)` or `Nullable(Int64)`
    pub fn parse(declared: &str) -> Result<Self> {
        let ty = unwrap_modifiers(declared.trim());

        let kind = if ty == "String"
            || ty == "UUID"
            || ty == "IPv4"
            || ty == "IPv6"
            || ty.starts_with("FixedString(")
            || ty.starts_with("Enum")
        {
            ColumnKind::String
        } else if ty.starts_with("Int") || ty.starts_with("UInt") {
            ColumnKind::Integer
        } else if ty.starts_with("Float") || ty.starts_with("Decimal") {
            ColumnKind::Float
        } else if ty == "Bool" || ty == "Boolean" {
            ColumnKind::Boolean
        } else if ty.starts_with("Date") {
            ColumnKind::DateTime
        } else {
            return Err(PortError::Schema(format!(
                "unrecognized column type: {}",
                declared
            )));
        };
        Ok(kind)
    }

    /// Value written when a row carries nothing for this column
    pub fn default_value(self) -> Value {
        match self {
            ColumnKind::String => Value::String(String::new()),
            ColumnKind::Integer | ColumnKind::DateTime => Value::from(0),
            ColumnKind::Float => Value::from(0.0),
            ColumnKind::Boolean => Value::Bool(false),
        }
    }
}

fn unwrap_modifiers(mut ty: &str) -> &str {
    loop {
        let inner = ["Nullable(", "LowCardinality("]
            .iter()
            .find_map(|prefix| ty.strip_prefix(prefix))
            .and_then(|rest| rest.strip_suffix(')'));
        match inner {
            Some(inner) => ty = inner.trim(),
            None => return ty,
        }
    }
}

/// Live column set of one table, in declared order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<(String, ColumnKind)>,
}

impl TableSchema {
    /// Build from introspected `(name, type)` pairs; unknown types are fatal
    pub fn from_columns<'a, I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let columns = columns
            .into_iter()
            .map(|(name, ty)| Ok((name.to_string(), ColumnKind::parse(ty)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn from_info(info: &[ColumnInfo]) -> Result<Self> {
        Self::from_columns(info.iter().map(|c| (c.name.as_str(), c.column_type.as_str())))
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn kind(&self, column: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, kind)| *kind)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.kind(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.columns.iter().map(|(name, kind)| (name.as_str(), *kind))
    }
}

/// One column of a table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: String,
    pub codec: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            codec: None,
        }
    }

    fn render(&self) -> String {
        match &self.codec {
            Some(codec) => format!("{} {} {}", quote_column(&self.name), self.column_type, codec),
            None => format!("{} {}", quote_column(&self.name), self.column_type),
        }
    }
}

/// Options for tables generated from source metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlOptions {
    pub engine: String,
    pub partition_by: String,
    pub time_type: String,
    pub float_type: String,
}

impl Default for DdlOptions {
    fn default() -> Self {
        Self {
            engine: "ReplacingMergeTree".to_string(),
            partition_by: "toYYYYMM(time)".to_string(),
            time_type: "DateTime".to_string(),
            float_type: "Float32".to_string(),
        }
    }
}

/// `CREATE TABLE` description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub engine: String,
    pub partition_by: Option<String>,
    pub order_by: Vec<String>,
}

impl TableDefinition {
    /// Infer a table from one record: tags are low-cardinality strings,
    /// fields take the type of their value, `time` is ordered on
    pub fn from_record(record: &Record, engine: &str) -> Self {
        let mut columns: Vec<ColumnDef> = record
            .tags
            .keys()
            .map(|k| ColumnDef::new(sanitize_column_name(k), "LowCardinality(String)"))
            .collect();
        columns.extend(record.fields.iter().map(|(k, v)| {
            let ty = match v {
                FieldValue::Integer(_) => "Int64",
                FieldValue::Float(_) => "Float64",
                FieldValue::Boolean(_) => "Bool",
                FieldValue::String(_) => "String",
            };
            ColumnDef::new(sanitize_column_name(k), ty)
        }));
        columns.push(time_column(AUTO_TIME_TYPE));

        Self {
            name: record.entity.clone(),
            columns,
            engine: engine.to_string(),
            partition_by: None,
            order_by: vec![TIME_COLUMN.to_string()],
        }
    }

    /// Build a table from the source store's declared field types and tag keys
    pub fn from_source(
        entity: &str,
        fields: &FieldSchema,
        tags: &[String],
        options: &DdlOptions,
    ) -> Self {
        let mut tags: Vec<String> = tags.iter().map(|t| sanitize_column_name(t)).collect();
        tags.sort();
        tags.dedup();

        let mut columns: Vec<ColumnDef> = tags
            .iter()
            .map(|t| ColumnDef::new(t.clone(), "LowCardinality(String)"))
            .collect();
        for (name, kind) in fields {
            let ty = match kind {
                FieldType::Integer => "Int64",
                FieldType::Float => options.float_type.as_str(),
                FieldType::String => "String",
                FieldType::Boolean => "Bool",
            };
            columns.push(ColumnDef::new(sanitize_column_name(name), ty));
        }
        columns.push(time_column(&options.time_type));

        let mut order_by = tags;
        order_by.push(TIME_COLUMN.to_string());

        Self {
            name: entity.to_string(),
            columns,
            engine: options.engine.clone(),
            partition_by: Some(options.partition_by.clone()),
            order_by,
        }
    }

    /// Render the DDL statement without a trailing semicolon
    pub fn create_statement(&self, if_not_exists: bool) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.render()))
            .collect::<Vec<_>>()
            .join(",\n");
        let order_by = self
            .order_by
            .iter()
            .map(|c| {
                if c == TIME_COLUMN {
                    c.clone()
                } else {
                    quote_column(c)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "CREATE TABLE {}{} (\n{}\n) ENGINE = {}",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            quote_column(&self.name),
            columns,
            self.engine
        );
        if let Some(partition) = &self.partition_by {
            sql.push_str(&format!("\nPARTITION BY {}", partition));
        }
        sql.push_str(&format!("\nORDER BY ({})", order_by));
        sql
    }

    /// Schema that rows are loaded against once this table exists
    pub fn schema(&self) -> Result<TableSchema> {
        TableSchema::from_columns(
            self.columns
                .iter()
                .map(|c| (c.name.as_str(), c.column_type.as_str())),
        )
    }
}

/// `DROP TABLE IF EXISTS` for one table
pub fn drop_statement(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_column(table))
}

fn time_column(ty: &str) -> ColumnDef {
    ColumnDef {
        name: TIME_COLUMN.to_string(),
        column_type: ty.to_string(),
        codec: Some(TIME_CODEC.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_parse() {
        for (declared, kind) in [
            ("String", ColumnKind::String),
            ("LowCardinality(String)", ColumnKind::String),
            ("LowCardinality(Nullable(String))", ColumnKind::String),
            ("FixedString(16)", ColumnKind::String),
            ("Enum8('a' = 1)", ColumnKind::String),
            ("Int64", ColumnKind::Integer),
            ("UInt8", ColumnKind::Integer),
            ("Nullable(Int32)", ColumnKind::Integer),
            ("Float32", ColumnKind::Float),
            ("Decimal(10, 2)", ColumnKind::Float),
            ("Bool", ColumnKind::Boolean),
            ("DateTime", ColumnKind::DateTime),
            ("DateTime64(0)", ColumnKind::DateTime),
            ("Date32", ColumnKind::DateTime),
        ] {
            assert_eq!(ColumnKind::parse(declared).unwrap(), kind, "{}", declared);
        }

        let err = ColumnKind::parse("Array(String)").unwrap_err();
        assert!(matches!(err, PortError::Schema(_)));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(ColumnKind::String.default_value(), Value::String(String::new()));
        assert_eq!(ColumnKind::Integer.default_value(), Value::from(0));
        assert_eq!(ColumnKind::Float.default_value(), Value::from(0.0));
        assert_eq!(ColumnKind::Boolean.default_value(), Value::Bool(false));
        assert_eq!(ColumnKind::DateTime.default_value(), Value::from(0));
    }

    #[test]
    fn test_definition_from_record() {
        let record = Record::new("cpu", 1_700_000_000)
            .with_tag("host-name", "a")
            .with_field("load", 1.5)
            .with_field("procs", 12i64)
            .with_field("up", true);

        let def = TableDefinition::from_record(&record, "MergeTree");
        assert_eq!(
            def.create_statement(true),
            "CREATE TABLE IF NOT EXISTS `cpu` (\n\
             \x20   `host_name` LowCardinality(String),\n\
             \x20   `load` Float64,\n\
             \x20   `procs` Int64,\n\
             \x20   `up` Bool,\n\
             \x20   `time` DateTime64(0) CODEC(DoubleDelta)\n\
             ) ENGINE = MergeTree\n\
             ORDER BY (time)"
        );

        let schema = def.schema().unwrap();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.kind("host_name"), Some(ColumnKind::String));
        assert_eq!(schema.kind("time"), Some(ColumnKind::DateTime));
    }

    #[test]
    fn test_definition_from_source() {
        let mut fields = FieldSchema::new();
        fields.insert("load".into(), FieldType::Float);
        fields.insert("status".into(), FieldType::String);
        let tags = vec!["region".to_string(), "host".to_string()];

        let def = TableDefinition::from_source("cpu", &fields, &tags, &DdlOptions::default());
        assert_eq!(
            def.create_statement(false),
            "CREATE TABLE `cpu` (\n\
             \x20   `host` LowCardinality(String),\n\
             \x20   `region` LowCardinality(String),\n\
             \x20   `load` Float32,\n\
             \x20   `status` String,\n\
             \x20   `time` DateTime CODEC(DoubleDelta)\n\
             ) ENGINE = ReplacingMergeTree\n\
             PARTITION BY toYYYYMM(time)\n\
             ORDER BY (`host`, `region`, time)"
        );
        assert_eq!(drop_statement("cpu"), "DROP TABLE IF EXISTS `cpu`");
    }
}
