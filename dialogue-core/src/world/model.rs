//! Static world data records.
//!
//! Entities, edges, and facts are loaded once from JSON at startup and are
//! immutable for the life of the process. A load failure is fatal: no
//! partially constructed store is allowed to serve a dialogue turn.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors from loading world data.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named thing in the world: an NPC, place, organization, item, or event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A directed, typed relation between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEdge {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A sentence of lore attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldFact {
    pub id: String,
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EntityFile {
    #[serde(default)]
    entities: Vec<WorldEntity>,
}

#[derive(Debug, Deserialize)]
struct EdgeFile {
    #[serde(default)]
    edges: Vec<WorldEdge>,
}

#[derive(Debug, Deserialize)]
struct WorldFactFile {
    #[serde(default)]
    entities: Vec<WorldEntity>,
    #[serde(default)]
    facts: Vec<WorldFact>,
}

/// Load the `{"entities": [...]}` collection.
pub fn load_entities(path: impl AsRef<Path>) -> Result<Vec<WorldEntity>, WorldError> {
    let payload = std::fs::read_to_string(path)?;
    let file: EntityFile = serde_json::from_str(&payload)?;
    Ok(file.entities)
}

/// Load the `{"edges": [...]}` collection.
pub fn load_edges(path: impl AsRef<Path>) -> Result<Vec<WorldEdge>, WorldError> {
    let payload = std::fs::read_to_string(path)?;
    let file: EdgeFile = serde_json::from_str(&payload)?;
    Ok(file.edges)
}

/// Load the combined `{"entities": [...], "facts": [...]}` collection backing
/// the fact store.
pub fn load_world_facts(
    path: impl AsRef<Path>,
) -> Result<(Vec<WorldEntity>, Vec<WorldFact>), WorldError> {
    let payload = std::fs::read_to_string(path)?;
    let file: WorldFactFile = serde_json::from_str(&payload)?;
    Ok((file.entities, file.facts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_defaults() {
        let entity: WorldEntity = serde_json::from_str(
            r#"{"id": "e1", "name": "Aldric", "type": "npc"}"#,
        )
        .unwrap();
        assert_eq!(entity.id, "e1");
        assert!(entity.aliases.is_empty());
        assert!(entity.description.is_empty());
    }

    #[test]
    fn test_edge_properties() {
        let edge: WorldEdge = serde_json::from_str(
            r#"{"id": "r1", "type": "OWNS", "source_id": "e1", "target_id": "e2",
                "properties": {"since": "1042"}}"#,
        )
        .unwrap();
        assert_eq!(edge.kind, "OWNS");
        assert_eq!(edge.properties.get("since").map(String::as_str), Some("1042"));
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let result: Result<WorldFact, _> =
            serde_json::from_str(r#"{"id": "f1", "type": "lore"}"#);
        assert!(result.is_err());
    }
}
