//! Paged extraction of one measurement into records

use super::client::{qualified_name, ChunkedResponse, InfluxClient, QueryResponse};
use crate::{FieldType, FieldValue, PortError, Record, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Declared field types of one measurement
pub type FieldSchema = BTreeMap<String, FieldType>;

/// Date bounds for a dump: `since` inclusive, `until` exclusive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl TimeFilter {
    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(since: Option<&str>, until: Option<&str>) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| PortError::Config(format!("invalid date \"{}\": {}", s, e)))
        };
        let filter = Self {
            since: since.map(parse).transpose()?,
            until: until.map(parse).transpose()?,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since >= until {
                return Err(PortError::Config(format!(
                    "since ({}) must be before until ({})",
                    since, until
                )));
            }
        }
        Ok(())
    }

    /// WHERE clause for the SELECT, empty when unbounded
    pub fn where_clause(&self) -> String {
        let fmt = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
        match (self.since, self.until) {
            (Some(since), Some(until)) => format!(
                "WHERE time >= '{}' AND time < '{}'",
                fmt(since),
                fmt(until)
            ),
            (Some(since), None) => format!("WHERE time >= '{}'", fmt(since)),
            (None, Some(until)) => format!("WHERE time < '{}'", fmt(until)),
            (None, None) => String::new(),
        }
    }
}

/// Issues per-measurement SELECTs against one database
pub struct Extractor<'a> {
    client: &'a InfluxClient,
    database: &'a str,
    retention_policy: Option<&'a str>,
    chunk_size: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(
        client: &'a InfluxClient,
        database: &'a str,
        retention_policy: Option<&'a str>,
        chunk_size: usize,
    ) -> Self {
        Self {
            client,
            database,
            retention_policy,
            chunk_size,
        }
    }

    /// SELECT statement for one measurement
    pub fn select_query(&self, entity: &str, filter: &TimeFilter) -> String {
        let q = format!(
            "SELECT * FROM {}",
            qualified_name(self.retention_policy, entity)
        );
        match filter.where_clause() {
            w if w.is_empty() => q,
            w => format!("{} {}", q, w),
        }
    }

    /// Start streaming one measurement
    pub async fn open(
        &self,
        entity: &str,
        schema: FieldSchema,
        filter: &TimeFilter,
    ) -> Result<EntityPages> {
        let q = self.select_query(entity, filter);
        let response = self
            .client
            .query_chunked(self.database, &q, self.chunk_size)
            .await?;
        Ok(EntityPages {
            entity: entity.to_string(),
            schema,
            response,
            pages: 0,
        })
    }
}

/// Lazy sequence of decoded pages for one measurement
pub struct EntityPages {
    entity: String,
    schema: FieldSchema,
    response: ChunkedResponse,
    pages: usize,
}

impl EntityPages {
    /// Fetch and decode the next page
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>> {
        let Some(page) = self.response.next_page().await? else {
            return Ok(None);
        };
        self.pages += 1;
        let records = decode_page(&self.entity, &self.schema, &page)?;
        debug!(entity = %self.entity, page = self.pages, rows = records.len(), "decoded page");
        Ok(Some(records))
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }
}

/// Decode every row of every series in a page
pub fn decode_page(entity: &str, schema: &FieldSchema, page: &QueryResponse) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for result in &page.results {
        let Some(series) = &result.series else {
            break;
        };
        for s in series {
            records.reserve(s.values.len());
            for row in &s.values {
                records.push(decode_row(entity, schema, &s.columns, row)?);
            }
        }
    }
    Ok(records)
}

/// Decode one row: `time` becomes the timestamp, schema columns become typed
/// fields and everything else becomes a tag
pub fn decode_row(
    entity: &str,
    schema: &FieldSchema,
    columns: &[String],
    row: &[Value],
) -> Result<Record> {
    let mut record = Record::new(entity, 0);

    for (column, value) in columns.iter().zip(row) {
        if is_blank(value) {
            continue;
        }

        if column == "time" {
            record.timestamp = value.as_i64().ok_or_else(|| {
                PortError::integrity(entity, format!("non-integer time value {}", value))
            })?;
        } else if let Some(kind) = schema.get(column) {
            let field = typed_field(*kind, value).ok_or_else(|| {
                PortError::integrity(
                    entity,
                    format!("field \"{}\" is not a valid {:?}: {}", column, kind, value),
                )
            })?;
            record.fields.insert(column.clone(), field);
        } else {
            record.tags.insert(column.clone(), tag_text(value));
        }
    }

    if record.timestamp == 0 || record.fields.is_empty() {
        return Err(PortError::integrity(
            entity,
            format!(
                "no \"time\" column or 0 fields: time {}, fields {}",
                record.timestamp,
                record.fields.len()
            ),
        ));
    }
    Ok(record)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn typed_field(kind: FieldType, value: &Value) -> Option<FieldValue> {
    match kind {
        FieldType::Float => value.as_f64().map(FieldValue::Float),
        FieldType::Integer => value.as_i64().map(FieldValue::Integer),
        FieldType::Boolean => value.as_bool().map(FieldValue::Boolean),
        FieldType::String => Some(FieldValue::String(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
    }
}

fn tag_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
