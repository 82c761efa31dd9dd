//! Core record types for FluxPort

use crate::{PortError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp since Unix epoch, nanoseconds unless a precision says otherwise
pub type Timestamp = i64;

/// One time-series observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Measurement name (e.g., "cpu", "disk_io")
    pub entity: String,
    /// Sorted tags for consistent ordering
    pub tags: BTreeMap<String, String>,
    /// Field values
    pub fields: Fields,
    /// Timestamp in the record's precision
    pub timestamp: Timestamp,
}

impl Record {
    /// Create a new record with no tags or fields
    pub fn new(entity: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            entity: entity.into(),
            tags: BTreeMap::new(),
            fields: Fields::new(),
            timestamp,
        }
    }

    /// Add a tag to the record
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field to the record
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key, value.into());
        self
    }

    /// Check the invariants every encodable record must hold
    pub fn validate(&self) -> Result<()> {
        if self.entity.is_empty() {
            return Err(PortError::integrity("<unnamed>", "empty entity name"));
        }
        if self.timestamp == 0 {
            return Err(PortError::integrity(&self.entity, "missing timestamp"));
        }
        if self.fields.is_empty() {
            return Err(PortError::integrity(&self.entity, "record has no fields"));
        }
        if let Some(key) = self.tags.keys().find(|k| self.fields.get(k).is_some()) {
            return Err(PortError::integrity(
                &self.entity,
                format!("\"{}\" used as both tag and field", key),
            ));
        }
        Ok(())
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        self.entity.len()
            + self
                .tags
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
            + self.fields.size()
            + 8
    }
}

/// Field values container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fields(pub BTreeMap<String, FieldValue>);

impl Fields {
    /// Create empty fields
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a field
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.insert(key.into(), value);
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.size()).sum()
    }

    /// Iterate over fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::new()
    }
}

/// Possible field value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit float
    Float(f64),
    /// 64-bit signed integer
    Integer(i64),
    /// Boolean
    Boolean(bool),
    /// String
    String(String),
}

impl FieldValue {
    /// Get the size in bytes
    pub fn size(&self) -> usize {
        match self {
            FieldValue::Float(_) => 8,
            FieldValue::Integer(_) => 8,
            FieldValue::Boolean(_) => 1,
            FieldValue::String(s) => s.len(),
        }
    }

    /// Convert into a JSON value for column-store rows
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Float(v) => serde_json::json!(v),
            FieldValue::Integer(v) => serde_json::json!(v),
            FieldValue::Boolean(v) => serde_json::json!(v),
            FieldValue::String(v) => serde_json::json!(v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// Field type as declared by the source store's `SHOW FIELD KEYS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Float,
    Integer,
    String,
    Boolean,
}

impl FromStr for FieldType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float" => Ok(FieldType::Float),
            "integer" | "unsigned" => Ok(FieldType::Integer),
            "string" => Ok(FieldType::String),
            "boolean" => Ok(FieldType::Boolean),
            other => Err(PortError::Schema(format!("Unknown field type: {}", other))),
        }
    }
}

/// Time unit of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    Seconds,
    Milliseconds,
    Microseconds,
    #[default]
    Nanoseconds,
}

impl Precision {
    /// Number of decimal digits a present-day timestamp has in this unit
    pub fn digits(self) -> u32 {
        match self {
            Precision::Seconds => 10,
            Precision::Milliseconds => 13,
            Precision::Microseconds => 16,
            Precision::Nanoseconds => 19,
        }
    }

    /// Value of the `precision` query parameter on the source write API
    pub fn as_param(self) -> &'static str {
        match self {
            Precision::Seconds => "s",
            Precision::Milliseconds => "ms",
            Precision::Microseconds => "u",
            Precision::Nanoseconds => "ns",
        }
    }

    /// Check whether a timestamp has the digit length this unit implies
    pub fn matches(self, ts: Timestamp) -> bool {
        digit_count(ts) == self.digits()
    }

    /// Convert a timestamp from this unit into `target`
    pub fn convert(self, ts: Timestamp, target: Precision) -> Timestamp {
        let from = self.digits();
        let to = target.digits();
        if from > to {
            ts / 10_i64.pow(from - to)
        } else {
            ts.saturating_mul(10_i64.pow(to - from))
        }
    }
}

impl FromStr for Precision {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(Precision::Seconds),
            "ms" => Ok(Precision::Milliseconds),
            "u" | "us" => Ok(Precision::Microseconds),
            "ns" => Ok(Precision::Nanoseconds),
            other => Err(PortError::Config(format!("Unknown precision: {}", other))),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

fn digit_count(ts: Timestamp) -> u32 {
    ts.unsigned_abs().checked_ilog10().map_or(1, |d| d + 1)
}
