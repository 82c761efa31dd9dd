//! Downsampling rules declared as continuous queries on the source store
//!
//! Every metric gets one continuous query per interval, writing into a
//! retention policy of the same name in the target database:
//!
//! ```text
//! CREATE CONTINUOUS QUERY "node_load1_5m" ON "prometheus" BEGIN
//!   SELECT MEAN(value) INTO "trending"."5m"."node_load1" FROM "node_load1"
//!   GROUP BY time(5m), "cluster", "instance"
//! END
//! ```
//!
//! Rules come from a TOML file or the built-in node exporter set.

use crate::source::{quote_ident, InfluxClient, QueryResponse};
use crate::{PortError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// How a metric is reduced over an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Averaged
    Gauge,
    /// Maxed
    Counter,
}

impl MetricKind {
    pub fn aggregate(self) -> &'static str {
        match self {
            MetricKind::Gauge => "MEAN(value)",
            MetricKind::Counter => "MAX(value)",
        }
    }
}

/// One downsampled metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    pub name: String,
    pub kind: MetricKind,
    /// Keys grouped on in addition to the default ones
    #[serde(default)]
    pub group_by: Vec<String>,
}

impl MetricRule {
    pub fn new(name: &str, kind: MetricKind, group_by: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Continuous-aggregation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Database with the raw data
    #[serde(default = "default_source_db")]
    pub source_db: String,
    /// Database receiving the downsampled data
    #[serde(default = "default_target_db")]
    pub target_db: String,
    /// Downsampling intervals; each one is also a retention policy name
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    /// Keys every metric is grouped on
    #[serde(default = "default_group_by")]
    pub default_group_by: Vec<String>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricRule>,
    /// Drop the target database before recreating it
    #[serde(default)]
    pub drop_target_db: bool,
    /// Stop without changes when continuous queries already exist
    #[serde(default)]
    pub refuse_existing: bool,
}

fn default_source_db() -> String {
    "prometheus".to_string()
}

fn default_target_db() -> String {
    "trending".to_string()
}

fn default_intervals() -> Vec<String> {
    vec!["5m".to_string(), "1h".to_string()]
}

fn default_group_by() -> Vec<String> {
    vec!["cluster".to_string(), "instance".to_string()]
}

/// Node exporter metrics downsampled out of the box
pub fn default_metrics() -> Vec<MetricRule> {
    use MetricKind::{Counter, Gauge};
    let filesystem = ["mountpoint", "fstype", "device"];
    vec![
        MetricRule::new("node_cpu", Counter, &["mode", "cpu"]),
        MetricRule::new("node_disk_bytes_read", Counter, &["device"]),
        MetricRule::new("node_disk_bytes_written", Counter, &["device"]),
        MetricRule::new("node_disk_reads_completed", Counter, &["device"]),
        MetricRule::new("node_disk_writes_completed", Counter, &["device"]),
        MetricRule::new("node_filesystem_avail", Gauge, &filesystem),
        MetricRule::new("node_filesystem_size", Gauge, &filesystem),
        MetricRule::new("node_load1", Gauge, &[]),
        MetricRule::new("node_memory_Buffers", Gauge, &[]),
        MetricRule::new("node_memory_Cached", Gauge, &[]),
        MetricRule::new("node_memory_MemAvailable", Gauge, &[]),
        MetricRule::new("node_memory_MemFree", Gauge, &[]),
        MetricRule::new("node_memory_MemTotal", Gauge, &[]),
        MetricRule::new("node_network_receive_bytes", Counter, &["device"]),
        MetricRule::new("node_network_transmit_bytes", Counter, &["device"]),
    ]
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            source_db: default_source_db(),
            target_db: default_target_db(),
            intervals: default_intervals(),
            default_group_by: default_group_by(),
            metrics: default_metrics(),
            drop_target_db: false,
            refuse_existing: false,
        }
    }
}

impl AggregationConfig {
    /// Load rules from a TOML file; omitted keys take the built-in values
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AggregationConfig = toml::from_str(&content).map_err(|e| {
            PortError::Config(format!("invalid rules file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_db.is_empty() || self.target_db.is_empty() {
            return Err(PortError::Config("source and target databases are required".into()));
        }
        if self.intervals.is_empty() {
            return Err(PortError::Config("at least one interval is required".into()));
        }
        if let Some(bad) = self.intervals.iter().find(|i| !is_duration(i)) {
            return Err(PortError::Config(format!("invalid interval: {}", bad)));
        }
        if let Some(bad) = self.metrics.iter().find(|m| m.name.is_empty()) {
            return Err(PortError::Config(format!("metric with empty name: {:?}", bad)));
        }
        Ok(())
    }

    /// Group-by keys of one metric: defaults first, then the metric's own
    pub fn group_by(&self, metric: &MetricRule) -> Vec<String> {
        self.default_group_by
            .iter()
            .chain(metric.group_by.iter())
            .cloned()
            .collect()
    }

    /// Continuous query name for a metric and interval
    pub fn query_name(metric: &MetricRule, interval: &str) -> String {
        format!("{}_{}", metric.name, interval)
    }

    pub fn create_query(&self, metric: &MetricRule, interval: &str) -> String {
        let mut group_by = format!("time({})", interval);
        for key in self.group_by(metric) {
            group_by.push_str(", ");
            group_by.push_str(&quote_ident(&key));
        }
        format!(
            "CREATE CONTINUOUS QUERY {} ON {} BEGIN SELECT {} INTO {}.{}.{} FROM {} GROUP BY {} END",
            quote_ident(&Self::query_name(metric, interval)),
            quote_ident(&self.source_db),
            metric.kind.aggregate(),
            quote_ident(&self.target_db),
            quote_ident(interval),
            quote_ident(&metric.name),
            quote_ident(&metric.name),
            group_by
        )
    }
}

/// InfluxQL duration literal such as `5m`, `30s` or `1h30m`
fn is_duration(s: &str) -> bool {
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        if !matches!(&rest[..unit_len], "ns" | "u" | "µ" | "ms" | "s" | "m" | "h" | "d" | "w") {
            return false;
        }
        rest = &rest[unit_len..];
    }
    !s.is_empty()
}

pub fn drop_query(name: &str, database: &str) -> String {
    format!(
        "DROP CONTINUOUS QUERY {} ON {}",
        quote_ident(name),
        quote_ident(database)
    )
}

pub fn create_retention_policy(interval: &str, database: &str) -> String {
    format!(
        "CREATE RETENTION POLICY {} ON {} DURATION INF REPLICATION 1",
        quote_ident(interval),
        quote_ident(database)
    )
}

/// Names of the continuous queries defined on `database`
pub fn continuous_queries_on(response: &QueryResponse, database: &str) -> Vec<String> {
    response
        .results
        .iter()
        .filter_map(|r| r.series.as_ref())
        .flatten()
        .filter(|s| s.name == database)
        .flat_map(|s| s.values.iter())
        .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

/// What a run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    /// Continuous queries found on the source database
    pub existing: usize,
    /// Nothing was changed because queries already existed
    pub refused: bool,
    pub dropped_queries: usize,
    pub target_dropped: bool,
    pub target_created: bool,
    pub policies_created: Vec<String>,
    pub created_queries: usize,
}

/// Replace every continuous query on the source database with the configured rules
pub async fn apply(client: &InfluxClient, config: &AggregationConfig) -> Result<AggregationSummary> {
    config.validate()?;
    let source = config.source_db.as_str();
    let target = config.target_db.as_str();
    let mut summary = AggregationSummary::default();

    let response = client.query(None, "SHOW CONTINUOUS QUERIES").await?;
    let existing = continuous_queries_on(&response, source);
    summary.existing = existing.len();

    if config.refuse_existing && !existing.is_empty() {
        warn!(database = source, count = existing.len(), "continuous queries exist, leaving them in place");
        summary.refused = true;
        return Ok(summary);
    }

    for name in &existing {
        client.execute(None, &drop_query(name, source)).await?;
        summary.dropped_queries += 1;
    }
    info!(database = source, count = summary.dropped_queries, "deleted continuous queries");

    if config.drop_target_db {
        client
            .execute(None, &format!("DROP DATABASE {}", quote_ident(target)))
            .await?;
        summary.target_dropped = true;
        info!(database = target, "database dropped");
    }

    let databases = client.query(None, "SHOW DATABASES").await?.first_column();
    if !databases.iter().any(|d| d == target) {
        client
            .execute(None, &format!("CREATE DATABASE {}", quote_ident(target)))
            .await?;
        summary.target_created = true;
        info!(database = target, "database created");
    }

    let policies = client
        .query(None, &format!("SHOW RETENTION POLICIES ON {}", quote_ident(target)))
        .await?
        .first_column();
    for interval in &config.intervals {
        if !policies.contains(interval) {
            client
                .execute(None, &create_retention_policy(interval, target))
                .await?;
            info!(database = target, policy = %interval, "retention policy created");
            summary.policies_created.push(interval.clone());
        }

        for metric in &config.metrics {
            client
                .execute(Some(source), &config.create_query(metric, interval))
                .await?;
            summary.created_queries += 1;
        }
    }
    info!(database = source, count = summary.created_queries, "added continuous queries");

    Ok(summary)
}
