//! FluxPort CLI - InfluxDB backup, restore and migration

mod args;

use anyhow::{Context, Result};
use args::{AggregateArgs, Cli, Command, DumpArgs, MigrateArgs, RestoreArgs, SchemaArgs};
use chrono::Utc;
use clap::Parser;
use fluxport_core::aggregate::{self, AggregationConfig};
use fluxport_core::clickhouse::ClickHouseClient;
use fluxport_core::config::{DumpConfig, MigrateConfig, RestoreConfig};
use fluxport_core::restore::{backup_entities, LoadSummary};
use fluxport_core::schema::generate_definitions;
use fluxport_core::source::{InfluxClient, TimeFilter};
use fluxport_core::transport::BackupDir;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    info!(started = %now(), "fluxport {}", fluxport_core::VERSION);
    match run(cli.command).await {
        Ok(()) => {
            info!(finished = %now(), "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(finished = %now(), "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries `schema` output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Dump(args) => dump(args).await,
        Command::Restore(args) => restore(args).await,
        Command::Migrate(args) => migrate(args).await,
        Command::Schema(args) => schema(args).await,
        Command::Aggregate(args) => aggregate(args).await,
    }
}

async fn dump(args: DumpArgs) -> Result<()> {
    let client = InfluxClient::new(&args.source.config()).context("invalid InfluxDB settings")?;

    let mut config = DumpConfig::new(&args.db, &args.dir);
    config.retention_policy = args.rp.clone();
    config.compress = args.gzip;
    config.selection = args.selection.selection();
    config.time_filter = TimeFilter::parse(args.since.as_deref(), args.until.as_deref())?;

    info!(db = %config.database, dir = %config.dir.display(), "starting dump");
    let summary = fluxport_core::dump::dump(&client, &config)
        .await
        .context("dump failed")?;

    info!(
        measurements = summary.dumped.len(),
        ignored = summary.skipped.len(),
        lines = summary.total_lines(),
        "dump complete"
    );
    Ok(())
}

async fn restore(args: RestoreArgs) -> Result<()> {
    let client = InfluxClient::new(&args.source.config()).context("invalid InfluxDB settings")?;

    let mut config = RestoreConfig::new(&args.db, &args.dir);
    config.retention_policy = args.rp.clone();
    config.compress = args.gzip;
    config.selection = args.selection.selection();
    let target_precision = args.write_precision.unwrap_or(args.load.precision);
    config.load = args.load.options(args.batch_size, target_precision);
    config.validate()?;

    info!(dir = %config.dir.display(), db = %config.database, "starting restore");
    let backup = BackupDir::new(&config.dir, config.compress);
    let entities = backup_entities(&backup, &config.selection)?;
    info!(?entities, "files to restore");

    let prompt = format!("Confirm restore into \"{}\" db?", config.database);
    if !args.force && !confirm(&prompt)? {
        warn!("restore cancelled");
        return Ok(());
    }

    let summary = fluxport_core::restore::restore(&client, &config, &entities)
        .await
        .context("restore failed")?;
    report(&summary);
    Ok(())
}

async fn migrate(args: MigrateArgs) -> Result<()> {
    let store = ClickHouseClient::new(&args.store.config()).context("invalid ClickHouse settings")?;

    let mut config = MigrateConfig::new(&args.dir);
    config.compress = args.gzip;
    config.selection = args.selection.selection();
    config.load = args
        .load
        .options(args.batch_size, config.load.target_precision);
    config.auto_create = args.auto_create_schema;
    config.auto_drop = args.auto_drop_schema;
    config.engine = args.engine.clone();
    config.validate()?;

    info!(dir = %config.dir.display(), db = %store.database(), "starting migrate");
    let backup = BackupDir::new(&config.dir, config.compress);
    let entities = backup_entities(&backup, &config.selection)?;
    info!(?entities, "files to load");

    let prompt = format!("Confirm restore into \"{}\" db?", store.database());
    if !args.force && !confirm(&prompt)? {
        warn!("migrate cancelled");
        return Ok(());
    }

    let summary = fluxport_core::restore::migrate(store, &config, &entities)
        .await
        .context("migrate failed")?;
    report(&summary);
    Ok(())
}

async fn schema(args: SchemaArgs) -> Result<()> {
    let client = InfluxClient::new(&args.source.config()).context("invalid InfluxDB settings")?;
    let definitions = generate_definitions(
        &client,
        &args.db,
        &args.selection.selection(),
        &args.ddl_options(),
    )
    .await
    .context("schema generation failed")?;

    let mut stdout = io::stdout().lock();
    for definition in &definitions {
        writeln!(stdout, "{};\n", definition.create_statement(false))?;
    }
    info!(tables = definitions.len(), "schema generated");
    Ok(())
}

async fn aggregate(args: AggregateArgs) -> Result<()> {
    let client = InfluxClient::new(&args.source.config()).context("invalid InfluxDB settings")?;

    let mut config = match &args.rules {
        Some(path) => AggregationConfig::load(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?,
        None => AggregationConfig::default(),
    };
    if let Some(db) = args.source_db {
        config.source_db = db;
    }
    if let Some(db) = args.target_db {
        config.target_db = db;
    }
    config.drop_target_db |= args.drop_target_db;
    config.refuse_existing |= args.refuse_existing;

    let summary = aggregate::apply(&client, &config)
        .await
        .context("continuous query setup failed")?;
    if summary.refused {
        warn!(existing = summary.existing, "nothing changed");
    }
    Ok(())
}

fn report(summary: &LoadSummary) {
    info!(
        measurements = summary.entities.len(),
        records = summary.records(),
        invalid = summary.invalid(),
        "load complete"
    );
}

/// Ask on stderr; only a literal `yes` confirms
fn confirm(prompt: &str) -> Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "> {} [yes/no] ", prompt)?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
