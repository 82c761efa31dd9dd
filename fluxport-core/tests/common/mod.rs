//! In-process fake of the InfluxDB 1.x HTTP API

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct FakeMeasurement {
    /// `(field key, field type)`
    pub fields: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Error reported inside the SELECT response
    pub error: Option<String>,
}

impl FakeMeasurement {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn field(mut self, name: &str, kind: &str) -> Self {
        self.fields.push((name.to_string(), kind.to_string()));
        self
    }

    pub fn tag(mut self, name: &str) -> Self {
        self.tags.push(name.to_string());
        self
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub db: String,
    pub rp: Option<String>,
    pub precision: Option<String>,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct FakeInflux {
    pub measurements: BTreeMap<String, FakeMeasurement>,
    /// `(database, query name)`
    pub continuous_queries: Vec<(String, String)>,
    pub databases: Vec<String>,
    pub retention_policies: Vec<String>,
    /// Every query string received, in order
    pub queries: Vec<String>,
    /// Statements received over POST
    pub statements: Vec<String>,
    pub writes: Vec<WriteRequest>,
    /// Responses replayed by `/write` before it starts answering 204
    pub write_script: VecDeque<(u16, String)>,
}

pub type Shared = Arc<Mutex<FakeInflux>>;

impl FakeInflux {
    pub fn shared(self) -> Shared {
        Arc::new(Mutex::new(self))
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    q: String,
    db: Option<String>,
    chunked: Option<String>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    db: String,
    rp: Option<String>,
    precision: Option<String>,
}

/// Serve `state` on an ephemeral port and return the base URL
pub async fn spawn(state: Shared) -> String {
    let app = Router::new()
        .route("/query", get(get_query).post(post_query))
        .route("/write", post(write))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn get_query(State(state): State<Shared>, Query(params): Query<QueryParams>) -> Response {
    let mut state = state.lock().unwrap();
    state.queries.push(params.q.clone());
    answer(&state, &params)
}

async fn post_query(State(state): State<Shared>, Query(params): Query<QueryParams>) -> Response {
    let mut state = state.lock().unwrap();
    state.queries.push(params.q.clone());
    state.statements.push(params.q.clone());
    answer(&state, &params)
}

async fn write(
    State(state): State<Shared>,
    Query(params): Query<WriteParams>,
    body: String,
) -> Response {
    let mut state = state.lock().unwrap();
    state.writes.push(WriteRequest {
        db: params.db,
        rp: params.rp,
        precision: params.precision,
        body,
    });
    match state.write_script.pop_front() {
        Some((status, text)) => (StatusCode::from_u16(status).unwrap(), text).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn series(name: &str, columns: &[&str], values: Vec<Value>) -> Value {
    json!({ "name": name, "columns": columns, "values": values })
}

fn single(series: Vec<Value>) -> Value {
    if series.is_empty() {
        json!({ "results": [{ "statement_id": 0 }] })
    } else {
        json!({ "results": [{ "statement_id": 0, "series": series }] })
    }
}

/// Measurement named at the end of a `FROM` clause, quotes removed
fn target_of(q: &str) -> String {
    let from = q.split(" FROM ").nth(1).unwrap_or_default();
    let name = from.split(' ').next().unwrap_or_default();
    name.rsplit("\".\"")
        .next()
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

fn answer(state: &FakeInflux, params: &QueryParams) -> Response {
    let q = params.q.as_str();

    let body = if q == "SHOW MEASUREMENTS" {
        let names: Vec<Value> = state.measurements.keys().map(|m| json!([m])).collect();
        single(vec![series("measurements", &["name"], names)])
    } else if q.starts_with("SHOW FIELD KEYS") {
        let name = target_of(q);
        let fields: Vec<Value> = state
            .measurements
            .get(&name)
            .map(|m| m.fields.iter().map(|(k, t)| json!([k, t])).collect())
            .unwrap_or_default();
        if fields.is_empty() {
            single(vec![])
        } else {
            single(vec![series(&name, &["fieldKey", "fieldType"], fields)])
        }
    } else if q.starts_with("SHOW TAG KEYS") {
        let name = target_of(q);
        let tags: Vec<Value> = state
            .measurements
            .get(&name)
            .map(|m| m.tags.iter().map(|t| json!([t])).collect())
            .unwrap_or_default();
        single(vec![series(&name, &["tagKey"], tags)])
    } else if q.starts_with("SELECT") {
        return select(state, params);
    } else if q == "SHOW CONTINUOUS QUERIES" {
        let mut by_db: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for (db, name) in &state.continuous_queries {
            by_db
                .entry(db.as_str())
                .or_default()
                .push(json!([name, "CREATE CONTINUOUS QUERY ..."]));
        }
        let list = by_db
            .into_iter()
            .map(|(db, values)| series(db, &["name", "query"], values))
            .collect();
        single(list)
    } else if q == "SHOW DATABASES" {
        let names = state.databases.iter().map(|d| json!([d])).collect();
        single(vec![series("databases", &["name"], names)])
    } else if q.starts_with("SHOW RETENTION POLICIES") {
        let names = state
            .retention_policies
            .iter()
            .map(|p| json!([p, "0s", "168h0m0s", 1, true]))
            .collect();
        single(vec![series(
            "",
            &["name", "duration", "shardGroupDuration", "replicaN", "default"],
            names,
        )])
    } else {
        single(vec![])
    };

    (StatusCode::OK, body.to_string()).into_response()
}

/// Chunked SELECT: one JSON document per line, `chunk_size` rows each
fn select(state: &FakeInflux, params: &QueryParams) -> Response {
    let name = target_of(&params.q);
    let Some(measurement) = state.measurements.get(&name) else {
        return (StatusCode::OK, single(vec![]).to_string()).into_response();
    };

    if let Some(error) = &measurement.error {
        let body = json!({ "results": [{ "statement_id": 0, "error": error }] });
        return (StatusCode::OK, format!("{}\n", body)).into_response();
    }

    assert_eq!(params.chunked.as_deref(), Some("true"));
    assert!(params.db.is_some());
    let chunk_size = params.chunk_size.unwrap_or(10_000).max(1);
    let columns: Vec<&str> = measurement.columns.iter().map(String::as_str).collect();

    let mut body = String::new();
    for chunk in measurement.rows.chunks(chunk_size) {
        let doc = json!({
            "results": [{
                "statement_id": 0,
                "series": [series(&name, &columns, chunk.iter().map(|row| json!(row)).collect())],
                "partial": true
            }]
        });
        body.push_str(&doc.to_string());
        body.push('\n');
    }
    if measurement.rows.is_empty() {
        body.push_str(&single(vec![]).to_string());
        body.push('\n');
    }
    (StatusCode::OK, body).into_response()
}
