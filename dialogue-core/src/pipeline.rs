//! The per-turn dialogue pipeline.
//!
//! Stages run in a fixed order: load_context, graph_retrieval,
//! vector_retrieval, build_prompt, call_llm, format_response. Vector
//! retrieval consumes the graph stage's neighbor ids, so the two retrieval
//! stages are strictly sequential. Each stage only adds fields to the state
//! record, and a trace snapshot is taken after every stage.
//!
//! Failure policy: the generative-call stage absorbs backend failures into a
//! bracketed error string so the turn still completes; an error in any other
//! stage aborts the turn.

use crate::fusion::fuse;
use crate::index::IndexError;
use crate::npc::{NpcContext, NpcProfile};
use crate::prompts;
use crate::router::{
    GraphIntent, GraphQuerySpec, GraphRouter, QueryRouter, QuerySpec, AVAILABLE_EDGE_TYPES,
};
use crate::trace::{trace_value_of, ToTrace, TraceRecorder, TraceValue};
use crate::world::{format_retrieval_results, FactStore, KnowledgeGraph, RetrievalHit};
use llm::TextBackend;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a dialogue turn.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("similarity index error: {0}")]
    Index(#[from] IndexError),
}

/// The working record for one dialogue turn.
///
/// Fields are written by the stage that produces them and stay readable for
/// every later stage; nothing is ever removed.
#[derive(Debug, Clone)]
pub struct DialogueState {
    pub npc: NpcProfile,
    pub user_input: String,
    pub conversation_history: String,
    pub system_prompt: String,
    pub full_prompt: String,
    pub raw_response: String,
    pub formatted_response: String,
    pub retrieval_results: Vec<RetrievalHit>,
    pub query_spec: Option<QuerySpec>,
    pub graph_facts: Vec<String>,
    pub graph_query_spec: Option<GraphQuerySpec>,
    pub graph_neighbor_ids: Vec<String>,
}

impl DialogueState {
    /// Fresh state for a turn.
    pub fn new(npc: NpcProfile, user_input: &str, conversation_history: &str) -> Self {
        Self {
            npc,
            user_input: user_input.to_string(),
            conversation_history: conversation_history.to_string(),
            system_prompt: String::new(),
            full_prompt: String::new(),
            raw_response: String::new(),
            formatted_response: String::new(),
            retrieval_results: Vec::new(),
            query_spec: None,
            graph_facts: Vec::new(),
            graph_query_spec: None,
            graph_neighbor_ids: Vec::new(),
        }
    }
}

impl ToTrace for DialogueState {
    fn to_trace(&self) -> TraceValue {
        let text = |s: &String| TraceValue::Text(s.clone());
        let texts = |items: &Vec<String>| {
            TraceValue::Seq(items.iter().map(|s| TraceValue::Text(s.clone())).collect())
        };
        TraceValue::Map(vec![
            ("npc".to_string(), self.npc.to_trace()),
            ("user_input".to_string(), text(&self.user_input)),
            (
                "conversation_history".to_string(),
                text(&self.conversation_history),
            ),
            ("system_prompt".to_string(), text(&self.system_prompt)),
            ("full_prompt".to_string(), text(&self.full_prompt)),
            ("raw_response".to_string(), text(&self.raw_response)),
            (
                "formatted_response".to_string(),
                text(&self.formatted_response),
            ),
            (
                "retrieval_results".to_string(),
                trace_value_of(&self.retrieval_results),
            ),
            (
                "query_spec".to_string(),
                self.query_spec
                    .as_ref()
                    .map_or(TraceValue::Null, |spec| trace_value_of(spec)),
            ),
            ("graph_facts".to_string(), texts(&self.graph_facts)),
            (
                "graph_query_spec".to_string(),
                self.graph_query_spec
                    .as_ref()
                    .map_or(TraceValue::Null, |spec| trace_value_of(spec)),
            ),
            (
                "graph_neighbor_ids".to_string(),
                texts(&self.graph_neighbor_ids),
            ),
        ])
    }
}

/// Executes dialogue turns against injected stores, backend, and recorder.
pub struct DialoguePipeline {
    graph: Arc<KnowledgeGraph>,
    facts: Arc<FactStore>,
    backend: Arc<dyn TextBackend>,
    query_router: QueryRouter,
    graph_router: GraphRouter,
    trace: Arc<TraceRecorder>,
}

impl DialoguePipeline {
    pub fn new(
        graph: Arc<KnowledgeGraph>,
        facts: Arc<FactStore>,
        backend: Arc<dyn TextBackend>,
        trace: Arc<TraceRecorder>,
    ) -> Self {
        Self {
            graph,
            facts,
            query_router: QueryRouter::new(backend.clone()),
            graph_router: GraphRouter::new(backend.clone()),
            backend,
            trace,
        }
    }

    /// Run every stage over the given initial state and return the final
    /// state.
    pub async fn execute(&self, mut state: DialogueState) -> Result<DialogueState, PipelineError> {
        self.load_context(&mut state);
        self.trace.record("load_context", &state);

        self.graph_retrieval(&mut state).await;
        self.trace.record("graph_retrieval", &state);

        self.vector_retrieval(&mut state).await?;
        self.trace.record("vector_retrieval", &state);

        self.build_prompt(&mut state);
        self.trace.record("build_prompt", &state);

        self.call_llm(&mut state).await;
        self.trace.record("call_llm", &state);

        self.format_response(&mut state);
        self.trace.record("format_response", &state);

        Ok(state)
    }

    /// Run a single dialogue turn and return the NPC's formatted reply.
    pub async fn run_turn(
        &self,
        npc: &NpcProfile,
        user_input: &str,
        conversation_history: &str,
    ) -> Result<String, PipelineError> {
        let state = DialogueState::new(npc.clone(), user_input, conversation_history);
        let final_state = self.execute(state).await?;
        Ok(final_state.formatted_response)
    }

    /// Format the NPC profile into the roleplay system prompt.
    fn load_context(&self, state: &mut DialogueState) {
        state.system_prompt = prompts::npc_system_prompt(&state.npc.prompt_text());
    }

    /// Route the query, decide on graph traversal, and expand neighbors.
    ///
    /// Neighbor entity ids are kept for the vector stage to expand on.
    async fn graph_retrieval(&self, state: &mut DialogueState) {
        let npc_context = NpcContext::from_profile(&state.npc);
        let world_hints = self.facts.world_hints();

        let query_spec = self
            .query_router
            .route(&state.user_input, &npc_context, Some(&world_hints))
            .await;
        info!(
            "Router intent={} query='{}'",
            query_spec.intent.as_str(),
            query_spec.query_text
        );

        let graph_spec = self
            .graph_router
            .route(&state.user_input, &query_spec.entities, &AVAILABLE_EDGE_TYPES)
            .await;
        info!(
            "Graph router intent={} edges={}",
            graph_spec.graph_intent.as_str(),
            graph_spec.edge_types.join(",")
        );

        state.query_spec = Some(query_spec.clone());
        state.graph_query_spec = Some(graph_spec.clone());

        if graph_spec.graph_intent == GraphIntent::None {
            state.graph_facts = Vec::new();
            state.graph_neighbor_ids = Vec::new();
            return;
        }

        let edge_types = if graph_spec.edge_types.is_empty() {
            None
        } else {
            Some(graph_spec.edge_types.as_slice())
        };

        let mut entity_names: Vec<String> = query_spec
            .entities
            .iter()
            .map(|entity| entity.name.clone())
            .collect();
        if entity_names.is_empty() {
            entity_names.push(state.npc.name.clone());
        }
        let entity_ids = self.facts.resolve_entity_ids(&entity_names);

        let mut graph_facts = Vec::new();
        let mut neighbor_ids = Vec::new();
        let mut seen_neighbors = HashSet::new();

        for entity_id in &entity_ids {
            for edge in self.graph.get_neighbors(entity_id, edge_types, 1) {
                let source_name = self
                    .graph
                    .get_entity(&edge.source_id)
                    .map(|entity| entity.name.clone())
                    .unwrap_or_else(|| edge.source_id.clone());
                let target_name = self
                    .graph
                    .get_entity(&edge.target_id)
                    .map(|entity| entity.name.clone())
                    .unwrap_or_else(|| edge.target_id.clone());
                let relation = edge.kind.to_lowercase().replace('_', " ");

                if edge.properties.is_empty() {
                    graph_facts.push(format!("{source_name} {relation} {target_name}"));
                } else {
                    let props = edge
                        .properties
                        .iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    graph_facts.push(format!("{source_name} {relation} {target_name} ({props})"));
                }

                if seen_neighbors.insert(edge.target_id.clone()) {
                    neighbor_ids.push(edge.target_id.clone());
                }
            }
        }

        if !graph_facts.is_empty() {
            info!("Graph facts={}", graph_facts.len());
            for fact in &graph_facts {
                debug!("  - {fact}");
            }
        }

        state.graph_facts = graph_facts;
        state.graph_neighbor_ids = neighbor_ids;
    }

    /// Fetch semantic, entity-linked, and neighbor-linked facts and fuse
    /// them. Skipped entirely when the query spec says no retrieval is
    /// needed.
    async fn vector_retrieval(&self, state: &mut DialogueState) -> Result<(), PipelineError> {
        let needs_retrieval = state
            .query_spec
            .as_ref()
            .map_or(true, |spec| spec.needs_retrieval);
        if !needs_retrieval {
            info!("Vector retrieval skipped (needs_retrieval=false)");
            state.retrieval_results = Vec::new();
            return Ok(());
        }

        let query_text = state
            .query_spec
            .as_ref()
            .map(|spec| spec.query_text.as_str())
            .filter(|text| !text.is_empty())
            .unwrap_or(state.user_input.as_str())
            .to_string();

        let semantic_hits = self.facts.search(&query_text, 5).await?;
        info!("Vector semantic hits={}", semantic_hits.len());

        let entity_names: Vec<String> = state
            .query_spec
            .as_ref()
            .map(|spec| spec.entities.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default();
        let mut entity_hits = Vec::new();
        for entity_id in self.facts.resolve_entity_ids(&entity_names) {
            entity_hits.extend(self.facts.facts_for_entity(&entity_id, 3));
        }
        if !entity_hits.is_empty() {
            info!("Vector entity-linked hits={}", entity_hits.len());
        }

        let mut neighbor_hits = Vec::new();
        for neighbor_id in &state.graph_neighbor_ids {
            neighbor_hits.extend(self.facts.facts_for_entity(neighbor_id, 2));
        }
        if !neighbor_hits.is_empty() {
            info!("Vector neighbor hits={}", neighbor_hits.len());
        }

        let combined = fuse(semantic_hits, entity_hits, neighbor_hits);
        debug!("{}", format_retrieval_results(&combined));
        state.retrieval_results = combined;
        Ok(())
    }

    /// Assemble the full prompt: system prompt, retrieved knowledge,
    /// transcript, and the current user message.
    fn build_prompt(&self, state: &mut DialogueState) {
        let mut full_prompt = state.system_prompt.clone();

        if !state.graph_facts.is_empty() || !state.retrieval_results.is_empty() {
            full_prompt.push_str("\n\nWhat you know about the world:\n");
            for fact in &state.graph_facts {
                full_prompt.push_str("- ");
                full_prompt.push_str(fact);
                full_prompt.push('\n');
            }
            for hit in &state.retrieval_results {
                full_prompt.push_str("- ");
                full_prompt.push_str(&hit.text);
                full_prompt.push('\n');
            }
        }

        if !state.conversation_history.is_empty() {
            full_prompt.push_str("\n\n");
            full_prompt.push_str(&state.conversation_history);
        }

        full_prompt.push_str(&format!("\nHuman: {}\nAI:", state.user_input));
        state.full_prompt = full_prompt;
    }

    /// Call the generative backend. A failure becomes a bracketed error
    /// string in the response so downstream formatting still completes.
    async fn call_llm(&self, state: &mut DialogueState) {
        if state.full_prompt.is_empty() {
            state.raw_response =
                "[Error generating response: full prompt is empty]".to_string();
            return;
        }
        match self.backend.generate(&state.full_prompt).await {
            Ok(response) => state.raw_response = response,
            Err(e) => {
                state.raw_response = format!("[Error generating response: {e}]");
            }
        }
    }

    /// Post-process the raw response for presentation.
    fn format_response(&self, state: &mut DialogueState) {
        state.formatted_response = state.raw_response.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, StaticIndex};
    use crate::world::{WorldEdge, WorldEntity, WorldFact};

    const QUERY_NONE: &str = r#"{"intent":"SMALLTALK","query_text":"greetings","entities":[],"needs_retrieval":false,"location_bias":{"mode":"NEAR_NPC","location_name":""},"answer_format":"BRIEF"}"#;
    const GRAPH_NONE: &str = r#"{"graph_intent":"NONE","edge_types":[],"reason":"smalltalk"}"#;

    fn npc() -> NpcProfile {
        NpcProfile {
            name: "Aldric".to_string(),
            age: 45,
            location: "The Crooked Tavern, Port Valor".to_string(),
            profession: "Tavern Keeper".to_string(),
            traits: vec!["gruff".to_string()],
            childhood_backstory: "Docks.".to_string(),
            adult_backstory: "Tavern.".to_string(),
        }
    }

    fn entity(id: &str, name: &str, kind: &str) -> WorldEntity {
        WorldEntity {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            aliases: Vec::new(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    fn pipeline_with(
        backend: MockBackend,
        index: StaticIndex,
        entities: Vec<WorldEntity>,
        edges: Vec<WorldEdge>,
        facts: Vec<WorldFact>,
        trace: Arc<TraceRecorder>,
    ) -> DialoguePipeline {
        let graph = Arc::new(KnowledgeGraph::new(entities.clone(), edges));
        let store = Arc::new(FactStore::new(entities, facts, Arc::new(index)));
        DialoguePipeline::new(graph, store, Arc::new(backend), trace)
    }

    #[tokio::test]
    async fn test_turn_with_needs_retrieval_false_skips_index() {
        let backend = MockBackend::new()
            .reply(QUERY_NONE)
            .reply(GRAPH_NONE)
            .reply("Well met, traveler.");
        let index = StaticIndex::empty();
        let pipeline = pipeline_with(
            backend,
            index.clone(),
            vec![entity("e1", "Aldric", "npc")],
            Vec::new(),
            Vec::new(),
            Arc::new(TraceRecorder::disabled()),
        );

        let reply = pipeline.run_turn(&npc(), "hello there", "").await.unwrap();

        assert_eq!(reply, "Well met, traveler.");
        assert_eq!(index.query_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_error_string() {
        let backend = MockBackend::new()
            .reply(QUERY_NONE)
            .reply(GRAPH_NONE)
            .failure("backend down");
        let pipeline = pipeline_with(
            backend,
            StaticIndex::empty(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Arc::new(TraceRecorder::disabled()),
        );

        let state = pipeline
            .execute(DialogueState::new(npc(), "hello", ""))
            .await
            .unwrap();

        assert!(state
            .raw_response
            .starts_with("[Error generating response:"));
        assert!(state.raw_response.contains("backend down"));
        // Formatting still ran.
        assert_eq!(state.formatted_response, state.raw_response);
    }

    #[tokio::test]
    async fn test_prompt_includes_history_and_input() {
        let backend = MockBackend::new()
            .reply(QUERY_NONE)
            .reply(GRAPH_NONE)
            .reply("Aye.");
        let pipeline = pipeline_with(
            backend,
            StaticIndex::empty(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Arc::new(TraceRecorder::disabled()),
        );

        let history = "Human: hello\nAldric: Well met.\n\n";
        let state = pipeline
            .execute(DialogueState::new(npc(), "any news?", history))
            .await
            .unwrap();

        assert!(state.full_prompt.contains("Character Profile: Aldric"));
        assert!(state.full_prompt.contains(history));
        assert!(state.full_prompt.ends_with("Human: any news?\nAI:"));
    }

    #[tokio::test]
    async fn test_every_stage_is_traced_in_order() {
        let backend = MockBackend::new()
            .reply(QUERY_NONE)
            .reply(GRAPH_NONE)
            .reply("Aye.");
        let trace = Arc::new(TraceRecorder::in_memory());
        let pipeline = pipeline_with(
            backend,
            StaticIndex::empty(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            trace.clone(),
        );

        pipeline.run_turn(&npc(), "hello", "").await.unwrap();

        let (events, next_id) = trace.get_events_since(0);
        let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                "load_context",
                "graph_retrieval",
                "vector_retrieval",
                "build_prompt",
                "call_llm",
                "format_response"
            ]
        );
        assert_eq!(next_id, 6);
    }

    #[tokio::test]
    async fn test_router_fallback_still_produces_a_turn() {
        // Both router calls return garbage twice each; the main call works.
        let backend = MockBackend::new()
            .reply("garbage")
            .reply("garbage")
            .reply("garbage")
            .reply("garbage")
            .reply("I've heard nothing.");
        let pipeline = pipeline_with(
            backend,
            StaticIndex::empty(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Arc::new(TraceRecorder::disabled()),
        );

        let state = pipeline
            .execute(DialogueState::new(npc(), "any rumors?", ""))
            .await
            .unwrap();

        let spec = state.query_spec.as_ref().unwrap();
        assert_eq!(spec.query_text, "any rumors?");
        let graph_spec = state.graph_query_spec.as_ref().unwrap();
        assert_eq!(graph_spec.graph_intent, GraphIntent::None);
        assert_eq!(state.formatted_response, "I've heard nothing.");
    }
}
