//! Source store → backup files

use crate::config::DumpConfig;
use crate::enumerate::require_entities;
use crate::source::{Extractor, InfluxClient};
use crate::transport::BackupDir;
use crate::Result;
use tracing::{debug, info};

/// Lines written for one measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDump {
    pub entity: String,
    pub lines: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub dumped: Vec<EntityDump>,
    /// Measurements without field keys
    pub skipped: Vec<String>,
}

impl DumpSummary {
    pub fn total_lines(&self) -> u64 {
        self.dumped.iter().map(|d| d.lines).sum()
    }
}

/// Measurements a dump would process, in order
pub async fn dump_entities(client: &InfluxClient, config: &DumpConfig) -> Result<Vec<String>> {
    let discovered = if config.selection.needs_discovery() {
        client.measurements(&config.database).await?
    } else {
        Vec::new()
    };
    let entities = config.selection.resolve(discovered);
    require_entities(&entities, "Check the measurement list and the resume cursor.")?;
    Ok(entities)
}

/// Write one backup file per measurement, a page at a time
pub async fn dump(client: &InfluxClient, config: &DumpConfig) -> Result<DumpSummary> {
    config.validate()?;
    let entities = dump_entities(client, config).await?;
    info!(count = entities.len(), ?entities, "measurements to dump");

    let backup = BackupDir::new(&config.dir, config.compress);
    backup.ensure_exists()?;

    let rp = config.retention_policy.as_deref();
    let extractor = Extractor::new(client, &config.database, rp, config.chunk_size);
    let mut summary = DumpSummary::default();

    for entity in &entities {
        let Some(schema) = client.field_keys(&config.database, rp, entity).await? else {
            info!(entity = %entity, "no field keys, ignoring");
            summary.skipped.push(entity.clone());
            continue;
        };
        debug!(entity = %entity, ?schema, "field schema");

        let mut pages = extractor.open(entity, schema, &config.time_filter).await?;
        let mut writer = backup.create(entity)?;
        while let Some(records) = pages.next_page().await? {
            writer.write_records(&records)?;
            debug!(entity = %entity, lines = writer.lines(), "page written");
        }
        let lines = writer.finish()?;

        info!(entity = %entity, lines, "dumped");
        summary.dumped.push(EntityDump {
            entity: entity.clone(),
            lines,
        });
    }

    Ok(summary)
}
