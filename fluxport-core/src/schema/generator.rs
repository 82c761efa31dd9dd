//! Table definitions derived from source store metadata

use super::{DdlOptions, TableDefinition};
use crate::enumerate::EntitySelection;
use crate::source::InfluxClient;
use crate::Result;
use tracing::{debug, info};

/// One `CREATE TABLE` per measurement of `database` that has fields
pub async fn generate_definitions(
    client: &InfluxClient,
    database: &str,
    selection: &EntitySelection,
    options: &DdlOptions,
) -> Result<Vec<TableDefinition>> {
    let discovered = if selection.needs_discovery() {
        client.measurements(database).await?
    } else {
        Vec::new()
    };
    let entities = selection.resolve(discovered);
    debug!(count = entities.len(), "generating table definitions");

    let mut definitions = Vec::with_capacity(entities.len());
    for entity in &entities {
        // Empty measurements, or ones living only in another retention policy
        let Some(fields) = client.field_keys(database, None, entity).await? else {
            info!(entity = %entity, "no field keys, skipping");
            continue;
        };
        let tags = client.tag_keys(database, entity).await?;
        definitions.push(TableDefinition::from_source(entity, &fields, &tags, options));
    }
    Ok(definitions)
}
