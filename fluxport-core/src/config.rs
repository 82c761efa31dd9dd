//! Run configuration
//!
//! Every component receives the piece of configuration it needs by
//! reference. Nothing here is mutated once a run has started.

pub use crate::aggregate::AggregationConfig;
use crate::enumerate::EntitySelection;
use crate::source::TimeFilter;
use crate::{PortError, Precision, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Rows per page requested from the source's chunked query endpoint
pub const READ_CHUNK_SIZE: usize = 10_000;

/// Points per write request when restoring into the source store
pub const WRITE_BATCH_SIZE: usize = 5_000;

/// Rows per INSERT when migrating into the column store
pub const COLUMN_BATCH_SIZE: usize = 100_000;

/// Attempts per write request before the run is aborted
pub const MAX_WRITE_ATTEMPTS: u32 = 10;

/// Fixed pause between write attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Engine for tables created from the first record of an entity
pub const DEFAULT_ENGINE: &str = "MergeTree";

/// Connection settings for the source store's HTTP API
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL including scheme and port
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            username: None,
            password: None,
            timeout: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.url)
    }
}

/// Dump configuration
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Database to dump
    pub database: String,
    /// Retention policy qualifier for the SELECT
    pub retention_policy: Option<String>,
    /// Backup directory
    pub dir: PathBuf,
    /// Gzip each backup file
    pub compress: bool,
    pub selection: EntitySelection,
    pub time_filter: TimeFilter,
    /// Rows per page
    pub chunk_size: usize,
}

impl DumpConfig {
    pub fn new(database: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            retention_policy: None,
            dir: dir.into(),
            compress: false,
            selection: EntitySelection::default(),
            time_filter: TimeFilter::default(),
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(PortError::Config("dump database is required".into()));
        }
        if self.chunk_size == 0 {
            return Err(PortError::Config("chunk size must be positive".into()));
        }
        self.time_filter.validate()
    }
}

/// Retry policy for write requests
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_WRITE_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

/// Options shared by every load path
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Records per write request
    pub batch_size: usize,
    /// Pause before each batch
    pub chunk_delay: Option<Duration>,
    /// Pause between entities
    pub entity_delay: Option<Duration>,
    pub retry: RetryPolicy,
    /// Precision of the timestamps in the backup files
    pub input_precision: Precision,
    /// Precision expected by the target
    pub target_precision: Precision,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: WRITE_BATCH_SIZE,
            chunk_delay: None,
            entity_delay: None,
            retry: RetryPolicy::default(),
            input_precision: Precision::Nanoseconds,
            target_precision: Precision::Nanoseconds,
        }
    }
}

impl LoadOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PortError::Config("batch size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PortError::Config("at least one write attempt is required".into()));
        }
        Ok(())
    }
}

/// Restore-into-source configuration
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Target database
    pub database: String,
    /// Target retention policy
    pub retention_policy: Option<String>,
    /// Backup directory
    pub dir: PathBuf,
    /// Backup files are gzipped
    pub compress: bool,
    pub selection: EntitySelection,
    pub load: LoadOptions,
}

impl RestoreConfig {
    pub fn new(database: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            retention_policy: None,
            dir: dir.into(),
            compress: false,
            selection: EntitySelection::default(),
            load: LoadOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(PortError::Config("restore database is required".into()));
        }
        self.load.validate()
    }
}

/// Connection settings for the column store's HTTP interface
#[derive(Debug, Clone)]
pub struct ColumnStoreConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for ColumnStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            username: "default".to_string(),
            password: None,
            timeout: None,
        }
    }
}

impl ColumnStoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(PortError::Config("column store database is required".into()));
        }
        validate_url(&self.url)
    }
}

/// Migrate-into-column-store configuration
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Backup directory
    pub dir: PathBuf,
    /// Backup files are gzipped
    pub compress: bool,
    pub selection: EntitySelection,
    pub load: LoadOptions,
    /// Create missing tables from the first record of each entity
    pub auto_create: bool,
    /// Drop each entity's table before loading it
    pub auto_drop: bool,
    /// Engine for auto-created tables
    pub engine: String,
}

impl MigrateConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compress: false,
            selection: EntitySelection::default(),
            load: LoadOptions {
                batch_size: COLUMN_BATCH_SIZE,
                target_precision: Precision::Seconds,
                ..Default::default()
            },
            auto_create: false,
            auto_drop: false,
            engine: DEFAULT_ENGINE.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.trim().is_empty() {
            return Err(PortError::Config("table engine must not be empty".into()));
        }
        self.load.validate()
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(PortError::Config(format!(
            "URL must include the http(s) scheme: {}",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let load = LoadOptions::default();
        assert_eq!(load.batch_size, 5_000);
        assert_eq!(load.retry.max_attempts, 10);
        assert_eq!(load.retry.delay, Duration::from_secs(1));

        let migrate = MigrateConfig::new("backup");
        assert_eq!(migrate.load.batch_size, 100_000);
        assert_eq!(migrate.load.target_precision, Precision::Seconds);
        assert_eq!(migrate.engine, "MergeTree");
    }

    #[test]
    fn test_validation() {
        let mut source = SourceConfig::default();
        assert!(source.validate().is_ok());
        source.url = "localhost:8086".into();
        assert!(source.validate().is_err());

        let mut restore = RestoreConfig::new("db", "backup");
        assert!(restore.validate().is_ok());
        restore.load.batch_size = 0;
        assert!(restore.validate().is_err());

        let dump = DumpConfig::new("", "backup");
        assert!(dump.validate().is_err());
    }
}
