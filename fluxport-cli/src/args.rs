//! Command line arguments

use clap::{Args, Parser, Subcommand};
use fluxport_core::config::{
    ColumnStoreConfig, LoadOptions, SourceConfig, COLUMN_BATCH_SIZE, DEFAULT_ENGINE,
    WRITE_BATCH_SIZE,
};
use fluxport_core::enumerate::EntitySelection;
use fluxport_core::schema::DdlOptions;
use fluxport_core::Precision;
use std::path::PathBuf;
use std::time::Duration;

/// Back up, restore and migrate InfluxDB data via line protocol
#[derive(Parser, Debug)]
#[command(
    name = "fluxport",
    version,
    about = "Back up, restore and migrate InfluxDB data via line protocol",
    after_help = "EXAMPLES:\n    \
        INFLUX_PW=secret fluxport dump --url http://influx:8086 --user admin --db telegraf --dir backup --gzip\n    \
        fluxport restore --db telegraf --dir backup --gzip --chunk-delay 0.5\n    \
        CH_PASSWORD=secret fluxport migrate --ch-db metrics --dir backup --auto-create-schema\n    \
        fluxport schema --db telegraf > schema.sql\n    \
        fluxport aggregate --rules rules.toml --refuse-existing"
)]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dump measurements into line-protocol files
    Dump(DumpArgs),
    /// Write line-protocol files back into InfluxDB
    Restore(RestoreArgs),
    /// Load line-protocol files into ClickHouse tables
    Migrate(MigrateArgs),
    /// Print ClickHouse CREATE TABLE statements for InfluxDB measurements
    Schema(SchemaArgs),
    /// Recreate continuous queries for downsampling
    Aggregate(AggregateArgs),
}

/// InfluxDB connection
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// InfluxDB URL including scheme and port
    #[arg(long, default_value = "http://localhost:8086", value_name = "URL")]
    pub url: String,

    /// InfluxDB user
    #[arg(long, value_name = "USER")]
    pub user: Option<String>,

    /// InfluxDB password
    #[arg(long, env = "INFLUX_PW", hide_env_values = true, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_parser = parse_seconds, value_name = "SECS")]
    pub timeout: Option<Duration>,
}

impl SourceArgs {
    pub fn config(&self) -> SourceConfig {
        SourceConfig {
            url: self.url.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
        }
    }
}

/// Which measurements to process
#[derive(Args, Debug)]
pub struct SelectionArgs {
    /// Comma-separated measurements; disables discovery, exclusions and the resume cursor
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    pub measurements: Option<Vec<String>>,

    /// Comma-separated measurements to leave out
    #[arg(long = "ignore-measurements", value_delimiter = ',', value_name = "LIST")]
    pub exclude: Vec<String>,

    /// Start at this measurement
    #[arg(long, value_name = "NAME")]
    pub from_measurement: Option<String>,
}

impl SelectionArgs {
    pub fn selection(&self) -> EntitySelection {
        EntitySelection {
            entities: self.measurements.clone(),
            exclude: self.exclude.clone(),
            resume_from: self.from_measurement.clone(),
        }
    }
}

/// Throttling and precision shared by restore and migrate
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Pause in seconds (fractions allowed) before each batch
    #[arg(long, value_parser = parse_seconds, value_name = "SECS")]
    pub chunk_delay: Option<Duration>,

    /// Pause in seconds (fractions allowed) between measurements
    #[arg(long, value_parser = parse_seconds, value_name = "SECS")]
    pub measurement_delay: Option<Duration>,

    /// Timestamp precision of the backup files (s, ms, u, ns)
    #[arg(long, default_value = "ns", value_parser = parse_precision, value_name = "PRECISION")]
    pub precision: Precision,
}

impl LoadArgs {
    pub fn options(&self, batch_size: usize, target_precision: Precision) -> LoadOptions {
        LoadOptions {
            batch_size,
            chunk_delay: self.chunk_delay,
            entity_delay: self.measurement_delay,
            input_precision: self.precision,
            target_precision,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Database to dump
    #[arg(long, value_name = "DB")]
    pub db: String,

    /// Retention policy to read from
    #[arg(long, value_name = "RP")]
    pub rp: Option<String>,

    /// Backup directory, created if missing
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Gzip the backup files
    #[arg(long)]
    pub gzip: bool,

    /// First day to dump, YYYY-MM-DD (inclusive)
    #[arg(long, value_name = "DATE")]
    pub since: Option<String>,

    /// Last day to dump, YYYY-MM-DD (exclusive)
    #[arg(long, value_name = "DATE")]
    pub until: Option<String>,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Database to restore into
    #[arg(long, value_name = "DB")]
    pub db: String,

    /// Retention policy to restore into
    #[arg(long, value_name = "RP")]
    pub rp: Option<String>,

    /// Backup directory
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Backup files are gzipped
    #[arg(long)]
    pub gzip: bool,

    /// Points per write request
    #[arg(long, default_value_t = WRITE_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Precision to write with (defaults to the backup precision)
    #[arg(long, value_parser = parse_precision, value_name = "PRECISION")]
    pub write_precision: Option<Precision>,

    #[command(flatten)]
    pub load: LoadArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,
}

/// ClickHouse connection
#[derive(Args, Debug)]
pub struct ColumnStoreArgs {
    /// ClickHouse HTTP URL
    #[arg(long = "ch-url", default_value = "http://localhost:8123", value_name = "URL")]
    pub url: String,

    /// ClickHouse database to load into
    #[arg(long = "ch-db", value_name = "DB")]
    pub database: String,

    /// ClickHouse user
    #[arg(long = "ch-user", default_value = "default", value_name = "USER")]
    pub user: String,

    /// ClickHouse password
    #[arg(long = "ch-password", env = "CH_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub password: Option<String>,
}

impl ColumnStoreArgs {
    pub fn config(&self) -> ColumnStoreConfig {
        ColumnStoreConfig {
            url: self.url.clone(),
            database: self.database.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            timeout: None,
        }
    }
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub store: ColumnStoreArgs,

    /// Backup directory
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Backup files are gzipped
    #[arg(long)]
    pub gzip: bool,

    /// Rows per INSERT
    #[arg(long, default_value_t = COLUMN_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Create missing tables from the first record of each measurement
    #[arg(long)]
    pub auto_create_schema: bool,

    /// Drop each table before loading it
    #[arg(long)]
    pub auto_drop_schema: bool,

    /// Engine for created tables
    #[arg(long, default_value = DEFAULT_ENGINE, value_name = "ENGINE")]
    pub engine: String,

    #[command(flatten)]
    pub load: LoadArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Database to read measurements from
    #[arg(long, value_name = "DB")]
    pub db: String,

    /// Table engine
    #[arg(long, default_value = "ReplacingMergeTree", value_name = "ENGINE")]
    pub engine: String,

    /// PARTITION BY expression
    #[arg(long, default_value = "toYYYYMM(time)", value_name = "EXPR")]
    pub partition_by: String,

    /// Type of the time column
    #[arg(long, default_value = "DateTime", value_name = "TYPE")]
    pub time_type: String,

    /// Type of float fields
    #[arg(long, default_value = "Float32", value_name = "TYPE")]
    pub float_type: String,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

impl SchemaArgs {
    pub fn ddl_options(&self) -> DdlOptions {
        DdlOptions {
            engine: self.engine.clone(),
            partition_by: self.partition_by.clone(),
            time_type: self.time_type.clone(),
            float_type: self.float_type.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// TOML rules file; the built-in node exporter rules are used otherwise
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Database with the raw data (overrides the rules file)
    #[arg(long, value_name = "DB")]
    pub source_db: Option<String>,

    /// Database for downsampled data (overrides the rules file)
    #[arg(long, value_name = "DB")]
    pub target_db: Option<String>,

    /// Drop the target database first
    #[arg(long)]
    pub drop_target_db: bool,

    /// Leave everything alone when continuous queries already exist
    #[arg(long)]
    pub refuse_existing: bool,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("invalid number of seconds: {}", s))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid number of seconds: {}", e))
}

fn parse_precision(s: &str) -> Result<Precision, String> {
    s.parse().map_err(|e: fluxport_core::PortError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::parse_from([
            "fluxport",
            "restore",
            "--db",
            "telegraf",
            "--dir",
            "backup",
            "--measurements",
            "cpu,mem",
            "--chunk-delay",
            "0.25",
            "--precision",
            "s",
        ]);
        let Command::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert_eq!(args.batch_size, 5_000);
        assert_eq!(args.load.chunk_delay, Some(Duration::from_millis(250)));
        assert_eq!(args.load.precision, Precision::Seconds);
        assert_eq!(
            args.selection.selection().entities,
            Some(vec!["cpu".to_string(), "mem".to_string()])
        );
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("2").unwrap(), Duration::from_secs(2));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }
}
