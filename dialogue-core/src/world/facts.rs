//! Entity/fact store with alias resolution and semantic retrieval.

use super::model::{load_world_facts, WorldEntity, WorldError, WorldFact};
use crate::index::{IndexEntry, IndexError, SimilarityIndex};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Score sentinel marking hits found by exact entity linkage rather than
/// semantic similarity.
pub const ENTITY_MATCH_SCORE: &str = "entity-match";

/// One retrieved fact, normalized across the semantic and structural paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: String,
    pub text: String,
    pub entity_id: String,
    pub entity_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub tags: String,
    pub score: String,
}

/// Known-world entity names bucketed by category, used to ground router
/// prompts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldHints {
    pub org_names: Vec<String>,
    pub location_names: Vec<String>,
    pub npc_names: Vec<String>,
    pub item_names: Vec<String>,
}

/// Immutable entity/fact collection with alias-based resolution and a thin
/// client to the external similarity index.
pub struct FactStore {
    entities: Vec<WorldEntity>,
    facts: Vec<WorldFact>,
    entity_by_id: HashMap<String, usize>,
    alias_index: HashMap<String, String>,
    alias_patterns: Vec<(String, regex::Regex)>,
    index: Arc<dyn SimilarityIndex>,
}

impl FactStore {
    /// Build the store from already-loaded collections.
    pub fn new(
        entities: Vec<WorldEntity>,
        facts: Vec<WorldFact>,
        index: Arc<dyn SimilarityIndex>,
    ) -> Self {
        let mut entity_by_id = HashMap::new();
        let mut alias_index = HashMap::new();
        let mut alias_patterns = Vec::new();

        for (idx, entity) in entities.iter().enumerate() {
            entity_by_id.insert(entity.id.clone(), idx);
            for alias in std::iter::once(&entity.name).chain(entity.aliases.iter()) {
                alias_index.insert(alias.to_lowercase(), entity.id.clone());
                let pattern = format!(r"\b{}\b", regex::escape(alias));
                if let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    alias_patterns.push((entity.id.clone(), re));
                }
            }
        }

        Self {
            entities,
            facts,
            entity_by_id,
            alias_index,
            alias_patterns,
            index,
        }
    }

    /// Load the store from the combined world-facts JSON file.
    pub fn load(
        path: impl AsRef<Path>,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self, WorldError> {
        let (entities, facts) = load_world_facts(path)?;
        Ok(Self::new(entities, facts, index))
    }

    fn entity_name(&self, entity_id: &str) -> &str {
        self.entity_by_id
            .get(entity_id)
            .map(|&idx| self.entities[idx].name.as_str())
            .unwrap_or("unknown")
    }

    /// Resolve entity names to ids by case-insensitive exact match against
    /// the name/alias set. Unmatched names are silently dropped; no partial
    /// matching.
    pub fn resolve_entity_ids(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter_map(|name| self.alias_index.get(&name.trim().to_lowercase()))
            .cloned()
            .collect()
    }

    /// Entity ids mentioned in free text, by case-insensitive word-boundary
    /// alias match.
    pub fn entity_mentions(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut mentions = Vec::new();
        for (entity_id, pattern) in &self.alias_patterns {
            if pattern.is_match(text) && seen.insert(entity_id.clone()) {
                mentions.push(entity_id.clone());
            }
        }
        mentions
    }

    /// Up to `limit` facts linked to an entity, in store order, tagged with
    /// the entity-match score sentinel.
    pub fn facts_for_entity(&self, entity_id: &str, limit: usize) -> Vec<RetrievalHit> {
        let mut hits = Vec::new();
        for fact in &self.facts {
            if fact.entity_id != entity_id {
                continue;
            }
            let entity_name = self.entity_name(&fact.entity_id);
            hits.push(RetrievalHit {
                id: fact.id.clone(),
                text: format!("{entity_name}: {}", fact.text),
                entity_id: fact.entity_id.clone(),
                entity_name: entity_name.to_string(),
                kind: fact.kind.clone(),
                source: fact.source.clone(),
                tags: fact.tags.join(","),
                score: ENTITY_MATCH_SCORE.to_string(),
            });
            if hits.len() >= limit {
                break;
            }
        }
        hits
    }

    /// Semantic search delegated to the external index. A blank query
    /// short-circuits to an empty result without calling the index.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let raw = self.index.query(query, k).await?;
        let hits = raw
            .into_iter()
            .map(|hit| {
                let meta = |key: &str| hit.metadata.get(key).cloned().unwrap_or_default();
                RetrievalHit {
                    id: hit.id,
                    text: hit.document,
                    entity_id: meta("entity_id"),
                    entity_name: meta("entity_name"),
                    kind: meta("type"),
                    source: meta("source"),
                    tags: meta("tags"),
                    score: hit.distance.to_string(),
                }
            })
            .collect();
        Ok(hits)
    }

    /// Upsert every fact into the similarity index. Documents are rendered as
    /// `"<entity name>: <fact text>"`, matching the retrieval hit text.
    pub async fn build_index(&self) -> Result<(), IndexError> {
        let entries: Vec<IndexEntry> = self
            .facts
            .iter()
            .map(|fact| {
                let entity_name = self.entity_name(&fact.entity_id);
                let metadata = HashMap::from([
                    ("entity_id".to_string(), fact.entity_id.clone()),
                    ("entity_name".to_string(), entity_name.to_string()),
                    ("type".to_string(), fact.kind.clone()),
                    ("source".to_string(), fact.source.clone()),
                    ("tags".to_string(), fact.tags.join(",")),
                ]);
                IndexEntry {
                    id: fact.id.clone(),
                    document: format!("{entity_name}: {}", fact.text),
                    metadata,
                }
            })
            .collect();

        if entries.is_empty() {
            return Ok(());
        }
        self.index.upsert(entries).await
    }

    /// Known-world entity names bucketed into the four router-prompt
    /// categories by entity type.
    pub fn world_hints(&self) -> WorldHints {
        let mut hints = WorldHints::default();
        for entity in &self.entities {
            match entity.kind.to_lowercase().as_str() {
                "org" | "organization" | "faction" | "guild" => {
                    hints.org_names.push(entity.name.clone());
                }
                "location" | "place" | "region" | "city" => {
                    hints.location_names.push(entity.name.clone());
                }
                "person" | "npc" | "character" => {
                    hints.npc_names.push(entity.name.clone());
                }
                "item" | "artifact" | "object" => {
                    hints.item_names.push(entity.name.clone());
                }
                _ => {}
            }
        }
        hints
    }

    /// Number of facts in the store.
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Number of entities in the store.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

/// Render retrieved hits for debug logging.
pub fn format_retrieval_results(results: &[RetrievalHit]) -> String {
    if results.is_empty() {
        return "No facts retrieved.".to_string();
    }
    let mut lines = vec!["Retrieved facts:".to_string()];
    for (idx, hit) in results.iter().enumerate() {
        lines.push(format!(
            "{}. {} | {} | score={} | {}",
            idx + 1,
            hit.id,
            hit.entity_name,
            hit.score,
            hit.text.trim()
        ));
    }
    lines.join("\n")
}
