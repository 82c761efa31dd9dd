//! HTTP client for the source store's `/query` and `/write` endpoints

use super::extractor::FieldSchema;
use crate::config::SourceConfig;
use crate::load::WriteOutcome;
use crate::{FieldType, PortError, Precision, Result};
use bytes::BytesMut;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Text in a write response meaning the points were dropped for being
/// older than the retention window
pub const RETENTION_SKIP_MARKER: &str = "points beyond retention policy";

// ============================================================================
// Response types
// ============================================================================

/// One JSON document returned by `/query` (one per chunk when chunked)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<Series>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    /// Turn an error reported inside the document into an `Err`
    pub fn check(self) -> Result<Self> {
        if let Some(error) = &self.error {
            return Err(PortError::Query(error.clone()));
        }
        if let Some(error) = self.results.iter().find_map(|r| r.error.as_ref()) {
            return Err(PortError::Query(error.clone()));
        }
        Ok(self)
    }

    /// First column of every row of the first series of every statement
    pub fn first_column(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.series.as_ref())
            .flat_map(|series| series.iter().take(1))
            .flat_map(|s| s.values.iter())
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client for the source store HTTP API
#[derive(Debug, Clone)]
pub struct InfluxClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl InfluxClient {
    /// Create a new client
    pub fn new(config: &SourceConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    /// Run a query and return the whole response
    pub async fn query(&self, database: Option<&str>, q: &str) -> Result<QueryResponse> {
        self.run(Method::GET, database, q).await
    }

    /// Run a statement that modifies the server (`CREATE`, `DROP`); these
    /// are only accepted over POST
    pub async fn execute(&self, database: Option<&str>, q: &str) -> Result<QueryResponse> {
        self.run(Method::POST, database, q).await
    }

    async fn run(&self, method: Method, database: Option<&str>, q: &str) -> Result<QueryResponse> {
        let mut params = vec![("q", q)];
        if let Some(db) = database {
            params.push(("db", db));
        }
        debug!(query = q, %method, "running query");

        let response = self.request(method, "/query").query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(PortError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| PortError::InvalidResponse(e.to_string()))?;
        parsed.check()
    }

    /// Start a chunked query; pages are pulled with [`ChunkedResponse::next_page`]
    pub async fn query_chunked(
        &self,
        database: &str,
        q: &str,
        chunk_size: usize,
    ) -> Result<ChunkedResponse> {
        let chunk_size = chunk_size.to_string();
        let params = [
            ("q", q),
            ("db", database),
            ("epoch", "ns"),
            ("chunked", "true"),
            ("chunk_size", chunk_size.as_str()),
        ];
        debug!(query = q, chunk_size = %chunk_size, "running chunked query");

        let response = self.request(Method::GET, "/query").query(&params).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(ChunkedResponse {
            response,
            buf: BytesMut::new(),
            scanned: 0,
            done: false,
        })
    }

    /// Post line protocol to `/write`; transport errors come back as outcomes
    pub async fn write(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        precision: Precision,
        body: String,
    ) -> WriteOutcome {
        let mut params = vec![("db", database), ("precision", precision.as_param())];
        if let Some(rp) = retention_policy {
            params.push(("rp", rp));
        }

        let response = match self
            .request(Method::POST, "/write")
            .query(&params)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return WriteOutcome::Transient(e.to_string()),
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        classify_write(status, &text)
    }

    /// List measurements in catalog order
    pub async fn measurements(&self, database: &str) -> Result<Vec<String>> {
        let response = self.query(Some(database), "SHOW MEASUREMENTS").await?;
        Ok(response.first_column())
    }

    /// Field keys and types of one measurement; `None` when it has no fields
    pub async fn field_keys(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        entity: &str,
    ) -> Result<Option<FieldSchema>> {
        let q = format!(
            "SHOW FIELD KEYS FROM {}",
            qualified_name(retention_policy, entity)
        );
        let response = self.query(Some(database), &q).await?;

        let mut schema = FieldSchema::new();
        let rows = response
            .results
            .iter()
            .filter_map(|r| r.series.as_ref())
            .flatten()
            .flat_map(|s| s.values.iter());
        for row in rows {
            let (Some(name), Some(kind)) = (
                row.first().and_then(|v| v.as_str()),
                row.get(1).and_then(|v| v.as_str()),
            ) else {
                warn!(entity, ?row, "skipping malformed field key row");
                continue;
            };
            schema.insert(name.to_string(), kind.parse::<FieldType>()?);
        }

        Ok((!schema.is_empty()).then_some(schema))
    }

    /// Tag keys of one measurement
    pub async fn tag_keys(&self, database: &str, entity: &str) -> Result<Vec<String>> {
        let q = format!("SHOW TAG KEYS FROM {}", quote_ident(entity));
        let response = self.query(Some(database), &q).await?;
        Ok(response.first_column())
    }
}

/// Classify a `/write` response
pub fn classify_write(status: u16, body: &str) -> WriteOutcome {
    if body.contains(RETENTION_SKIP_MARKER) {
        return WriteOutcome::RetentionSkipped;
    }
    match status {
        200..=299 => WriteOutcome::Written,
        408 | 429 | 500..=599 => {
            WriteOutcome::Transient(format!("{} HTTP error: {}", status, body.trim()))
        }
        _ => WriteOutcome::Rejected(format!("{} HTTP error: {}", status, body.trim())),
    }
}

/// Double-quote an InfluxQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

pub(crate) fn qualified_name(retention_policy: Option<&str>, entity: &str) -> String {
    match retention_policy {
        Some(rp) => format!("{}.{}", quote_ident(rp), quote_ident(entity)),
        None => quote_ident(entity),
    }
}

// ============================================================================
// Chunked responses
// ============================================================================

/// A streaming `/query` response holding at most one page in memory
pub struct ChunkedResponse {
    response: reqwest::Response,
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no newline
    scanned: usize,
    done: bool,
}

impl ChunkedResponse {
    /// Read the next newline-delimited JSON page
    pub async fn next_page(&mut self) -> Result<Option<QueryResponse>> {
        loop {
            if let Some(line) = take_line(&mut self.buf, &mut self.scanned) {
                if let Some(page) = parse_page(&line)? {
                    return Ok(Some(page));
                }
                continue;
            }

            if self.done {
                let rest = self.buf.split();
                self.scanned = 0;
                return parse_page(&rest);
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.done = true,
            }
        }
    }
}

/// Split off the first newline-terminated line, searching only bytes not
/// scanned by an earlier call
fn take_line(buf: &mut BytesMut, scanned: &mut usize) -> Option<BytesMut> {
    match buf[*scanned..].iter().position(|b| *b == b'\n') {
        Some(pos) => {
            let line = buf.split_to(*scanned + pos + 1);
            *scanned = 0;
            Some(line)
        }
        None => {
            *scanned = buf.len();
            None
        }
    }
}

fn parse_page(bytes: &[u8]) -> Result<Option<QueryResponse>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PortError::InvalidResponse(e.to_string()))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    let page: QueryResponse =
        serde_json::from_str(text).map_err(|e| PortError::InvalidResponse(e.to_string()))?;
    page.check().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_write() {
        assert_eq!(classify_write(204, ""), WriteOutcome::Written);
        assert_eq!(
            classify_write(
                400,
                r#"{"error":"partial write: points beyond retention policy dropped=12"}"#
            ),
            WriteOutcome::RetentionSkipped
        );
        assert!(matches!(classify_write(503, "busy"), WriteOutcome::Transient(_)));
        assert!(matches!(classify_write(429, ""), WriteOutcome::Transient(_)));
        assert!(matches!(
            classify_write(400, r#"{"error":"unable to parse"}"#),
            WriteOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("cpu"), "\"cpu\"");
        assert_eq!(quote_ident("a\"b"), "\"a\\\"b\"");
        assert_eq!(qualified_name(Some("autogen"), "cpu"), "\"autogen\".\"cpu\"");
    }

    #[test]
    fn test_query_response_errors() {
        let ok: QueryResponse = serde_json::from_str(
            r#"{"results":[{"statement_id":0,"series":[{"name":"measurements","columns":["name"],"values":[["cpu"],["mem"]]}]}]}"#,
        )
        .unwrap();
        assert_eq!(ok.check().unwrap().first_column(), vec!["cpu", "mem"]);

        let failed: QueryResponse =
            serde_json::from_str(r#"{"results":[{"statement_id":0,"error":"database not found: x"}]}"#)
                .unwrap();
        assert!(matches!(failed.check(), Err(PortError::Query(_))));

        let top: QueryResponse = serde_json::from_str(r#"{"error":"timeout"}"#).unwrap();
        assert!(top.check().is_err());
    }

    #[test]
    fn test_take_line_resumes_scan() {
        let mut buf = BytesMut::from(&b"{\"results\""[..]);
        let mut scanned = 0;
        assert!(take_line(&mut buf, &mut scanned).is_none());
        assert_eq!(scanned, 10);

        buf.extend_from_slice(b":[]}\n{\"res");
        let line = take_line(&mut buf, &mut scanned).unwrap();
        assert_eq!(&line[..], b"{\"results\":[]}\n");
        assert_eq!(scanned, 0);
        assert_eq!(&buf[..], b"{\"res");

        assert!(take_line(&mut buf, &mut scanned).is_none());
        assert_eq!(scanned, 5);
    }

    #[test]
    fn test_parse_page() {
        assert!(parse_page(b"  \n").unwrap().is_none());
        let page = parse_page(br#"{"results":[{"statement_id":0}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(parse_page(b"{not json").is_err());
    }
}
