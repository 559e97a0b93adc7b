//! Graph traversal routing: whether and how to walk the world graph.
//!
//! Same two-call retry-then-fallback shape as the query router. Total
//! failure means "skip graph retrieval", never "guess a traversal".

use super::{extract_json, ExtractedEntity};
use llm::TextBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Edge types present in the world graph, offered to the router.
pub const AVAILABLE_EDGE_TYPES: [&str; 10] = [
    "KINSHIP",
    "INHERITED_FROM",
    "OWNS",
    "OWNED",
    "LOCATED_IN",
    "OPERATES_IN",
    "CONNECTS",
    "INVOLVED_IN",
    "HAPPENED_AT",
    "CAUSES",
];

const GRAPH_SYSTEM_PROMPT: &str = "You are a graph routing assistant. \
Output ONLY valid JSON. Do not include markdown or comments. \
Choose graph_intent and edge_types for traversing a world graph. \
If no graph traversal is needed, use graph_intent NONE and empty edge_types.";

const GRAPH_DEV_PROMPT: &str = r#"Schema:
{
  "graph_intent": "NONE | RELATIONSHIP | LOCATION | OWNERSHIP | MEMBERSHIP | CAUSALITY | ALL",
  "edge_types": ["KINSHIP", "INHERITED_FROM", "OWNS", "OWNED", "LOCATED_IN", "OPERATES_IN", "CONNECTS", "INVOLVED_IN", "HAPPENED_AT", "CAUSES"],
  "reason": "string"
}

Examples:
Input: Who is Aldric's uncle?
Output: {"graph_intent":"RELATIONSHIP","edge_types":["KINSHIP"],"reason":"Kinship term mentioned."}

Input: Where is the Crooked Tavern?
Output: {"graph_intent":"LOCATION","edge_types":["LOCATED_IN"],"reason":"Location question."}

Input: Who owns the Crooked Tavern?
Output: {"graph_intent":"OWNERSHIP","edge_types":["OWNS","OWNED"],"reason":"Ownership question."}

Input: Tell me about Aldric.
Output: {"graph_intent":"NONE","edge_types":[],"reason":"General facts can be handled by narrative retrieval."}
"#;

const RETRY_PREAMBLE: &str = "Your previous output was invalid JSON. Output ONLY valid JSON.";

/// What kind of graph traversal the turn calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphIntent {
    None,
    Relationship,
    Location,
    Ownership,
    Membership,
    Causality,
    All,
}

impl GraphIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphIntent::None => "NONE",
            GraphIntent::Relationship => "RELATIONSHIP",
            GraphIntent::Location => "LOCATION",
            GraphIntent::Ownership => "OWNERSHIP",
            GraphIntent::Membership => "MEMBERSHIP",
            GraphIntent::Causality => "CAUSALITY",
            GraphIntent::All => "ALL",
        }
    }
}

/// The graph routing decision for one turn.
///
/// An empty `edge_types` with an intent other than NONE means "no type
/// filter, traverse all edge types".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQuerySpec {
    pub graph_intent: GraphIntent,
    #[serde(default)]
    pub edge_types: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl GraphQuerySpec {
    /// Normalize edge types: trim, uppercase, drop empties, and dedup
    /// preserving first-occurrence order.
    pub fn validated(mut self) -> Self {
        let mut seen = HashSet::new();
        self.edge_types = self
            .edge_types
            .into_iter()
            .map(|edge_type| edge_type.trim().to_uppercase())
            .filter(|edge_type| !edge_type.is_empty() && seen.insert(edge_type.clone()))
            .collect();
        self
    }
}

/// Parse a JSON blob into a validated graph spec.
pub fn parse_graph_spec(json: &str) -> Result<GraphQuerySpec, serde_json::Error> {
    let spec: GraphQuerySpec = serde_json::from_str(json)?;
    Ok(spec.validated())
}

fn fallback_spec() -> GraphQuerySpec {
    GraphQuerySpec {
        graph_intent: GraphIntent::None,
        edge_types: Vec::new(),
        reason: String::new(),
    }
}

fn build_user_block(
    user_text: &str,
    entities: &[ExtractedEntity],
    available_edge_types: &[&str],
) -> String {
    let entity_lines: Vec<String> = entities
        .iter()
        .filter(|entity| !entity.name.is_empty())
        .map(|entity| format!("- {} ({})", entity.name, entity.entity_type.as_str()))
        .collect();

    let entity_block = if entity_lines.is_empty() {
        "None".to_string()
    } else {
        entity_lines.join("\n")
    };

    format!(
        "USER_MESSAGE: {user_text}\nENTITIES: {entity_block}\nAVAILABLE_EDGE_TYPES: {}",
        available_edge_types.join("; ")
    )
}

/// Classifies whether and how to traverse the world graph.
pub struct GraphRouter {
    backend: Arc<dyn TextBackend>,
}

impl GraphRouter {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    /// Route a graph traversal decision. Never fails: two attempts, then the
    /// skip-traversal fallback.
    pub async fn route(
        &self,
        user_text: &str,
        entities: &[ExtractedEntity],
        available_edge_types: &[&str],
    ) -> GraphQuerySpec {
        let user_block = build_user_block(user_text, entities, available_edge_types);

        let prompt = format!("{GRAPH_SYSTEM_PROMPT}\n\n{GRAPH_DEV_PROMPT}\n\n{user_block}");
        if let Some(spec) = self.attempt(&prompt).await {
            return spec;
        }

        let retry_prompt = format!("{GRAPH_SYSTEM_PROMPT}\n\n{RETRY_PREAMBLE}\n\n{user_block}");
        if let Some(spec) = self.attempt(&retry_prompt).await {
            return spec;
        }

        debug!("graph routing failed twice, skipping traversal");
        fallback_spec()
    }

    async fn attempt(&self, prompt: &str) -> Option<GraphQuerySpec> {
        let raw = match self.backend.generate(prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("graph router backend call failed: {e}");
                return None;
            }
        };
        let blob = extract_json(&raw)?;
        match parse_graph_spec(blob) {
            Ok(spec) => Some(spec),
            Err(e) => {
                debug!("graph router produced an invalid spec: {e}");
                None
            }
        }
    }
}
