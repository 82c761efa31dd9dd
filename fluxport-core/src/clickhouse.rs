//! Column store access over the ClickHouse HTTP interface

use crate::config::ColumnStoreConfig;
use crate::load::WriteOutcome;
use crate::{PortError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// One row keyed by column name
pub type Row = Map<String, Value>;

/// One `(table, column, type)` triple from schema introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnInfo {
    pub fn new(table: &str, name: &str, column_type: &str) -> Self {
        Self {
            table: table.to_string(),
            name: name.to_string(),
            column_type: column_type.to_string(),
        }
    }
}

/// Statement execution, batch insert and introspection on the target database
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Run a statement that returns nothing (DDL)
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Insert rows with an explicit column list
    async fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> WriteOutcome;

    /// Every column of every table in the target database, in table order
    async fn columns(&self) -> Result<Vec<ColumnInfo>>;
}

/// Backtick-quote a table or column identifier
pub fn quote_column(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// HTTP client for ClickHouse
#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    http: reqwest::Client,
    url: String,
    database: String,
    username: String,
    password: Option<String>,
}

impl ClickHouseClient {
    /// Create a new client
    pub fn new(config: &ColumnStoreConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn post(&self, body: String) -> std::result::Result<(u16, String), reqwest::Error> {
        let mut request = self
            .http
            .post(format!("{}/", self.url))
            .query(&[("database", self.database.as_str())])
            .header("X-ClickHouse-User", &self.username);
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.body(body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl ColumnStore for ClickHouseClient {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "executing statement");
        let (status, body) = self.post(sql.to_string()).await?;
        if status != 200 {
            return Err(PortError::Status { status, body });
        }
        Ok(())
    }

    async fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> WriteOutcome {
        let body = match insert_body(table, columns, rows) {
            Ok(body) => body,
            Err(e) => return WriteOutcome::Rejected(e.to_string()),
        };
        match self.post(body).await {
            Ok((status, text)) => classify_insert(status, &text),
            Err(e) => WriteOutcome::Transient(e.to_string()),
        }
    }

    async fn columns(&self) -> Result<Vec<ColumnInfo>> {
        let sql = "SELECT table, name, type FROM system.columns \
                   WHERE database = currentDatabase() \
                   ORDER BY table, position FORMAT JSONEachRow";
        let (status, body) = self.post(sql.to_string()).await?;
        if status != 200 {
            return Err(PortError::Status { status, body });
        }

        body.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l).map_err(|e| PortError::InvalidResponse(e.to_string()))
            })
            .collect()
    }
}

/// `INSERT ... FORMAT JSONEachRow` statement followed by one JSON row per line
pub fn insert_body(table: &str, columns: &[String], rows: &[Row]) -> Result<String> {
    let column_list = columns
        .iter()
        .map(|c| quote_column(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut body = format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow\n",
        quote_column(table),
        column_list
    );
    for row in rows {
        let line = serde_json::to_string(row)
            .map_err(|e| PortError::InvalidResponse(e.to_string()))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

/// Classify an insert response
pub fn classify_insert(status: u16, body: &str) -> WriteOutcome {
    match status {
        200..=299 => WriteOutcome::Written,
        408 | 429 | 500..=599 => {
            WriteOutcome::Transient(format!("{} HTTP error: {}", status, body.trim()))
        }
        _ => WriteOutcome::Rejected(format!("{} HTTP error: {}", status, body.trim())),
    }
}
