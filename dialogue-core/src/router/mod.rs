//! LLM-assisted query classification with bounded retry and deterministic
//! fallback.
//!
//! The router sends a classification prompt to the generative backend and
//! validates the JSON it returns. One retry is allowed, with a prompt that
//! states the previous output was invalid; after that the router falls back
//! to a fixed spec. Classification failures never surface past the router
//! boundary.

pub mod graph;
pub mod spec;

pub use graph::{GraphIntent, GraphQuerySpec, GraphRouter, AVAILABLE_EDGE_TYPES};
pub use spec::{
    parse_query_spec, AnswerFormat, EntityType, ExtractedEntity, Intent, LocationBias,
    LocationBiasMode, QuerySpec,
};

use crate::npc::NpcContext;
use crate::world::WorldHints;
use llm::TextBackend;
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a query router for a fictional world assistant. \
Output ONLY valid JSON. Do not include markdown or comments. \
JSON must match the schema exactly. \
If uncertain, choose ASK_ENTITY_FACTS. \
Resolve relative time phrases: lately/recently/these days -> 14, \
last week -> 7, last month -> 30, today -> 1, yesterday -> 2, \
otherwise 0. \
Location bias: default NEAR_NPC. \
If user mentions a place explicitly, use SPECIFIC_LOCATION + that name. \
Extract named entities (orgs, locations, items) into entities.";

const DEV_PROMPT: &str = r#"Schema:
{
  "intent": "ASK_EVENTS | ASK_ENTITY_FACTS | ASK_LOCATION | ASK_HOW_TO | ASK_RELATIONSHIP | ASK_COMPARISON | ASK_COUNT | SMALLTALK | OTHER",
  "query_text": "string",
  "entities": [{"name": "string", "type": "NPC | ORG | FACTION | LOCATION | ITEM | EVENT | UNKNOWN"}],
  "time_window_days": 0,
  "time_constraint_text": "string",
  "location_bias": {"mode": "NEAR_NPC | SPECIFIC_LOCATION | NONE", "location_name": "string"},
  "answer_format": "BRIEF | NORMAL | DETAILED"
}

Examples:
Input: Have you heard about any bandit attacks lately?
Output: {"intent":"ASK_EVENTS","query_text":"bandit attacks","entities":[],"time_window_days":14,"time_constraint_text":"lately","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: What happened on the North Road last week?
Output: {"intent":"ASK_EVENTS","query_text":"what happened on the North Road","entities":[{"name":"North Road","type":"LOCATION"}],"time_window_days":7,"time_constraint_text":"last week","location_bias":{"mode":"SPECIFIC_LOCATION","location_name":"North Road"},"answer_format":"NORMAL"}

Input: Where can I find Sunleaf?
Output: {"intent":"ASK_LOCATION","query_text":"find Sunleaf","entities":[{"name":"Sunleaf","type":"ITEM"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: What do the Iron Guard do?
Output: {"intent":"ASK_ENTITY_FACTS","query_text":"Iron Guard role","entities":[{"name":"Iron Guard","type":"ORG"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: What is the Lantern Guild responsible for?
Output: {"intent":"ASK_ENTITY_FACTS","query_text":"Lantern Guild responsibilities","entities":[{"name":"Lantern Guild","type":"ORG"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: Who does the Ironwatch report to?
Output: {"intent":"ASK_RELATIONSHIP","query_text":"Ironwatch chain of command","entities":[{"name":"Ironwatch","type":"ORG"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: Is Port Valor bigger than Grayfall?
Output: {"intent":"ASK_COMPARISON","query_text":"Port Valor compared to Grayfall","entities":[{"name":"Port Valor","type":"LOCATION"},{"name":"Grayfall","type":"LOCATION"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NONE","location_name":""},"answer_format":"NORMAL"}

Input: How many ships disappeared this season?
Output: {"intent":"ASK_COUNT","query_text":"ships disappeared this season","entities":[],"time_window_days":0,"time_constraint_text":"this season","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}

Input: Tell me about Prince Theron.
Output: {"intent":"ASK_ENTITY_FACTS","query_text":"Prince Theron","entities":[{"name":"Prince Theron","type":"NPC"}],"time_window_days":0,"time_constraint_text":"","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}
"#;

const RETRY_PREAMBLE: &str = "Your previous output was invalid JSON. Output ONLY valid JSON.";

/// Extract the JSON object from a backend response: the substring from the
/// first `{` to the last `}`. Returns `None` when no well-ordered brace pair
/// exists.
fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn build_user_block(
    user_text: &str,
    npc_context: &NpcContext,
    world_hints: Option<&WorldHints>,
) -> String {
    let mut lines = vec![
        format!("NPC_ID: {}", npc_context.npc_id),
        format!("NPC_NAME: {}", npc_context.npc_name),
        format!("NPC_LOCATION: {}", npc_context.npc_location),
        format!("WORLD_DATE: {}", npc_context.world_date),
        format!("USER_MESSAGE: {user_text}"),
    ];

    if let Some(hints) = world_hints {
        for (label, names) in [
            ("KNOWN_ORGS", &hints.org_names),
            ("KNOWN_LOCATIONS", &hints.location_names),
            ("KNOWN_NPCS", &hints.npc_names),
            ("KNOWN_ITEMS", &hints.item_names),
        ] {
            if !names.is_empty() {
                lines.push(format!("{label}: {}", names.join("; ")));
            }
        }
    }

    lines.join("\n")
}

fn fallback_spec(user_text: &str) -> QuerySpec {
    QuerySpec {
        intent: Intent::AskEntityFacts,
        query_text: user_text.to_string(),
        entities: Vec::new(),
        needs_retrieval: true,
        time_window_days: 0,
        time_constraint_text: String::new(),
        location_bias: LocationBias {
            mode: LocationBiasMode::NearNpc,
            location_name: String::new(),
        },
        answer_format: AnswerFormat::Normal,
    }
    .validated()
}

/// Classifies free-text user input into a [`QuerySpec`].
pub struct QueryRouter {
    backend: Arc<dyn TextBackend>,
}

impl QueryRouter {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    /// Route a user message. Never fails: two classification attempts, then
    /// the fixed fallback.
    pub async fn route(
        &self,
        user_text: &str,
        npc_context: &NpcContext,
        world_hints: Option<&WorldHints>,
    ) -> QuerySpec {
        let user_block = build_user_block(user_text, npc_context, world_hints);

        let prompt = format!("{SYSTEM_PROMPT}\n\n{DEV_PROMPT}\n\n{user_block}");
        if let Some(spec) = self.attempt(&prompt).await {
            return spec;
        }

        let retry_prompt = format!("{SYSTEM_PROMPT}\n\n{RETRY_PREAMBLE}\n\n{user_block}");
        if let Some(spec) = self.attempt(&retry_prompt).await {
            return spec;
        }

        debug!("query routing failed twice, using fallback spec");
        fallback_spec(user_text)
    }

    async fn attempt(&self, prompt: &str) -> Option<QuerySpec> {
        let raw = match self.backend.generate(prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("query router backend call failed: {e}");
                return None;
            }
        };
        let blob = extract_json(&raw)?;
        match parse_query_spec(blob) {
            Ok(spec) => Some(spec),
            Err(e) => {
                debug!("query router produced an invalid spec: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    const VALID: &str = r#"{"intent":"ASK_EVENTS","query_text":"bandit attacks","entities":[],"time_window_days":14,"time_constraint_text":"lately","location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"NORMAL"}"#;

    fn context() -> NpcContext {
        NpcContext {
            npc_id: "aldric".to_string(),
            npc_name: "Aldric".to_string(),
            npc_location: "The Crooked Tavern, Port Valor".to_string(),
            world_date: String::new(),
        }
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 1}\n```"),
            Some(r#"{"a": 1}"#)
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_json("}{"), None);
    }

    #[test]
    fn test_user_block_includes_hints() {
        let hints = WorldHints {
            org_names: vec!["Iron Guard".to_string(), "Lantern Guild".to_string()],
            location_names: vec!["Port Valor".to_string()],
            npc_names: Vec::new(),
            item_names: Vec::new(),
        };
        let block = build_user_block("hello", &context(), Some(&hints));
        assert!(block.contains("USER_MESSAGE: hello"));
        assert!(block.contains("KNOWN_ORGS: Iron Guard; Lantern Guild"));
        assert!(block.contains("KNOWN_LOCATIONS: Port Valor"));
        assert!(!block.contains("KNOWN_NPCS"));
    }

    #[tokio::test]
    async fn test_route_parses_valid_response() {
        let backend = MockBackend::new().reply(VALID);
        let router = QueryRouter::new(Arc::new(backend.clone()));

        let spec = router
            .route("Have you heard about any bandit attacks lately?", &context(), None)
            .await;

        assert_eq!(spec.intent, Intent::AskEvents);
        assert_eq!(spec.query_text, "bandit attacks");
        assert_eq!(spec.time_window_days, 14);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_route_is_deterministic_for_fixed_response() {
        for _ in 0..3 {
            let backend = MockBackend::new().reply(VALID);
            let router = QueryRouter::new(Arc::new(backend));
            let spec = router.route("bandit attacks?", &context(), None).await;
            assert_eq!(spec.intent, Intent::AskEvents);
            assert_eq!(spec.query_text, "bandit attacks");
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_one_bad_response() {
        let backend = MockBackend::new().reply("not json at all").reply(VALID);
        let router = QueryRouter::new(Arc::new(backend.clone()));

        let spec = router.route("bandit attacks?", &context(), None).await;

        assert_eq!(spec.intent, Intent::AskEvents);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_yield_fallback() {
        let backend = MockBackend::new().reply("garbage").reply("{\"intent\": \"NOT_REAL\"}");
        let router = QueryRouter::new(Arc::new(backend.clone()));

        let spec = router.route("Tell me of the deep roads", &context(), None).await;

        assert_eq!(spec.intent, Intent::AskEntityFacts);
        assert_eq!(spec.query_text, "Tell me of the deep roads");
        assert!(spec.entities.is_empty());
        assert_eq!(spec.location_bias.mode, LocationBiasMode::NearNpc);
        assert_eq!(spec.answer_format, AnswerFormat::Normal);
        assert!(spec.needs_retrieval);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_is_absorbed() {
        let backend = MockBackend::new()
            .failure("connection refused")
            .failure("connection refused");
        let router = QueryRouter::new(Arc::new(backend.clone()));

        let spec = router.route("anyone about?", &context(), None).await;

        assert_eq!(spec.intent, Intent::AskEntityFacts);
        assert_eq!(spec.query_text, "anyone about?");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_fenced_response_is_accepted() {
        let fenced = format!("```json\n{VALID}\n```");
        let backend = MockBackend::new().reply(&fenced);
        let router = QueryRouter::new(Arc::new(backend));

        let spec = router.route("bandits?", &context(), None).await;
        assert_eq!(spec.intent, Intent::AskEvents);
    }

    #[test]
    fn test_fallback_normalizes_empty_input() {
        let spec = fallback_spec("   ");
        assert_eq!(spec.query_text, "unknown");
    }
}
