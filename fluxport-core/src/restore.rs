//! Backup files → source store (restore) or column store (migrate)

use crate::clickhouse::ColumnStore;
use crate::config::{MigrateConfig, RestoreConfig};
use crate::enumerate::{require_entities, EntitySelection};
use crate::load::{BatchLoader, BatchSink, ColumnSink, EntityLoad, LineProtocolSink};
use crate::schema::ReconcileOptions;
use crate::source::InfluxClient;
use crate::transport::BackupDir;
use crate::Result;
use tokio::time::sleep;
use tracing::info;

/// Per-entity counters of a load run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub entities: Vec<EntityLoad>,
}

impl LoadSummary {
    pub fn records(&self) -> u64 {
        self.entities.iter().map(|e| e.records).sum()
    }

    pub fn invalid(&self) -> u64 {
        self.entities.iter().map(|e| e.invalid).sum()
    }
}

/// Entities with a backup file in `backup`, after selection
///
/// The directory must exist and the result must not be empty.
pub fn backup_entities(backup: &BackupDir, selection: &EntitySelection) -> Result<Vec<String>> {
    backup.require_exists()?;
    let discovered = if selection.needs_discovery() {
        backup.list_entities()?
    } else {
        Vec::new()
    };
    let entities = selection.resolve(discovered);
    require_entities(&entities, "If backup is gzipped, use --gzip.")?;
    Ok(entities)
}

/// Load each entity's backup file through `loader`, in order
pub async fn replay<S: BatchSink>(
    loader: &mut BatchLoader<S>,
    backup: &BackupDir,
    entities: &[String],
) -> Result<LoadSummary> {
    let entity_delay = loader.options().entity_delay;
    let mut summary = LoadSummary::default();

    for (i, entity) in entities.iter().enumerate() {
        if i > 0 {
            if let Some(delay) = entity_delay {
                sleep(delay).await;
            }
        }

        info!(entity = %entity, "loading");
        let reader = backup.open(entity)?;
        let stats = loader.load_entity(entity, reader).await?;
        info!(
            entity = %entity,
            records = stats.records,
            invalid = stats.invalid,
            batches = stats.batches,
            "loaded"
        );
        summary.entities.push(stats);
    }

    Ok(summary)
}

/// Write backup files back into the source store
pub async fn restore(
    client: &InfluxClient,
    config: &RestoreConfig,
    entities: &[String],
) -> Result<LoadSummary> {
    config.validate()?;
    let backup = BackupDir::new(&config.dir, config.compress);
    let sink = LineProtocolSink::new(
        client.clone(),
        config.database.clone(),
        config.retention_policy.clone(),
        config.load.target_precision,
    );
    let mut loader = BatchLoader::new(sink, config.load.clone());
    replay(&mut loader, &backup, entities).await
}

/// Insert backup files into column store tables named after each entity
pub async fn migrate<C: ColumnStore>(
    store: C,
    config: &MigrateConfig,
    entities: &[String],
) -> Result<LoadSummary> {
    config.validate()?;
    let backup = BackupDir::new(&config.dir, config.compress);
    let sink = ColumnSink::connect(store, ReconcileOptions::from_config(config)).await?;
    let mut loader = BatchLoader::new(sink, config.load.clone());
    replay(&mut loader, &backup, entities).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::WriteOutcome;
    use crate::{PortError, Record};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingSink {
        records: usize,
    }

    #[async_trait]
    impl BatchSink for CountingSink {
        async fn write_batch(&mut self, _entity: &str, batch: &[Record]) -> Result<WriteOutcome> {
            self.records += batch.len();
            Ok(WriteOutcome::Written)
        }
    }

    fn write_backup(backup: &BackupDir, entity: &str, n: i64) {
        let mut writer = backup.create(entity).unwrap();
        let records: Vec<Record> = (1..=n)
            .map(|i| Record::new(entity, i).with_field("value", i))
            .collect();
        writer.write_records(&records).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_backup_entities() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path(), false);
        for entity in ["mem", "cpu", "disk"] {
            write_backup(&backup, entity, 1);
        }

        let all = backup_entities(&backup, &EntitySelection::default()).unwrap();
        assert_eq!(all, vec!["cpu", "disk", "mem"]);

        let resumed = EntitySelection {
            resume_from: Some("disk".into()),
            ..Default::default()
        };
        assert_eq!(backup_entities(&backup, &resumed).unwrap(), vec!["disk", "mem"]);

        // Plain files are invisible to a gzip restore
        let gzipped = BackupDir::new(temp_dir.path(), true);
        let err = backup_entities(&gzipped, &EntitySelection::default()).unwrap_err();
        assert!(err.to_string().contains("--gzip"));

        let missing = BackupDir::new(temp_dir.path().join("nope"), false);
        assert!(matches!(
            backup_entities(&missing, &EntitySelection::default()),
            Err(PortError::Precondition(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_with_entity_delay() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path(), true);
        write_backup(&backup, "cpu", 7);
        write_backup(&backup, "mem", 3);

        let options = crate::config::LoadOptions {
            batch_size: 5,
            entity_delay: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let mut loader = BatchLoader::new(CountingSink::default(), options);
        let entities = vec!["cpu".to_string(), "mem".to_string()];

        let start = Instant::now();
        let summary = replay(&mut loader, &backup, &entities).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(summary.records(), 10);
        assert_eq!(summary.entities[0].batches, 2);
        assert_eq!(summary.entities[1].batches, 1);
        assert_eq!(loader.sink().records, 10);
    }
}
