//! Account lists on disk: CSV (`id,label`) or the JSON the harvest prints.

use std::path::Path;

use anyhow::{Context, Result};
use culler_core::models::Entity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    id: String,
    #[serde(default)]
    label: Option<String>,
}

/// Writes `entities` as `id,label` CSV.
pub fn write_csv(path: &Path, entities: &[Entity]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for entity in entities {
        writer.serialize(Row {
            id: entity.id.clone(),
            label: Some(entity.label.clone()),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads an account list: CSV when the extension is `.csv`, otherwise a
/// JSON array of entities. A missing CSV label falls back to the id.
pub fn read_entities(path: &Path) -> Result<Vec<Entity>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    if is_csv {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut entities = Vec::new();
        for row in reader.deserialize::<Row>() {
            let row = row.with_context(|| format!("Invalid row in {}", path.display()))?;
            let id = row.id.trim().trim_start_matches('@').to_string();
            if id.is_empty() {
                continue;
            }
            let label = row
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| id.clone());
            entities.push(Entity::new(id, label));
        }
        Ok(entities)
    } else {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).context("Invalid JSON account list")
    }
}
