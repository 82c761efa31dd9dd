//! Entity selection: explicit lists, exclusions and the resume cursor

use crate::{PortError, Result};

/// Which entities a run should process
#[derive(Debug, Clone, Default)]
pub struct EntitySelection {
    /// Explicit entity list; when set, discovery, exclusions and the cursor
    /// are all bypassed
    pub entities: Option<Vec<String>>,
    /// Entities to leave out of a discovered list
    pub exclude: Vec<String>,
    /// Start processing at this entity
    pub resume_from: Option<String>,
}

impl EntitySelection {
    /// Select exactly these entities
    pub fn explicit(entities: Vec<String>) -> Self {
        Self {
            entities: Some(entities),
            ..Default::default()
        }
    }

    /// Whether discovery is needed
    pub fn needs_discovery(&self) -> bool {
        self.entities.is_none()
    }

    /// Produce the ordered entity list from a discovered catalog
    pub fn resolve(&self, discovered: Vec<String>) -> Vec<String> {
        if let Some(entities) = &self.entities {
            return entities.clone();
        }
        filter_entities(discovered, &self.exclude, self.resume_from.as_deref())
    }
}

/// Drop excluded entities, then skip ahead to `resume_from`
///
/// A cursor that matches nothing yields an empty list rather than the
/// whole catalog.
pub fn filter_entities(
    entities: Vec<String>,
    exclude: &[String],
    resume_from: Option<&str>,
) -> Vec<String> {
    let mut entities: Vec<String> = entities
        .into_iter()
        .filter(|e| !exclude.contains(e))
        .collect();

    match resume_from {
        None => entities,
        Some(cursor) => match entities.iter().position(|e| e == cursor) {
            Some(start) => entities.split_off(start),
            None => Vec::new(),
        },
    }
}

/// Fail when nothing is left to process
pub fn require_entities(entities: &[String], hint: &str) -> Result<()> {
    if entities.is_empty() {
        return Err(PortError::Precondition(format!(
            "no entities to process. {}",
            hint
        )));
    }
    Ok(())
}
