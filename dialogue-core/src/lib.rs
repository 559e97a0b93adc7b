//! Knowledge-grounded NPC dialogue engine.
//!
//! This crate implements the retrieval-and-routing pipeline that answers
//! in-character NPC dialogue turns:
//! - LLM-assisted query classification with schema validation, bounded
//!   retry, and deterministic fallback
//! - Graph-based neighbor expansion over a static world graph
//! - Vector and entity-linked fact retrieval, fused into one ordered list
//! - An append-only trace log with a live HTTP viewer
//!
//! Stores are built once at startup and injected into the pipeline; the
//! generative backend and the similarity index are reached only through
//! their single-purpose traits.
//!
//! # Quick Start
//!
//! ```ignore
//! use dialogue_core::{DialoguePipeline, FactStore, KnowledgeGraph, TraceRecorder};
//! use dialogue_core::index::HttpSimilarityIndex;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let index = Arc::new(HttpSimilarityIndex::new("http://127.0.0.1:8900"));
//!     let graph = Arc::new(KnowledgeGraph::load("data/entities.json", "data/edges.json")?);
//!     let facts = Arc::new(FactStore::load("data/world_facts.json", index)?);
//!     let backend = llm::backend_from_config(&Default::default())?;
//!     let trace = Arc::new(TraceRecorder::disabled());
//!
//!     let pipeline = DialoguePipeline::new(graph, facts, backend, trace);
//!     let reply = pipeline.run_turn(&my_npc, "Any news?", "").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```

pub mod fusion;
pub mod index;
pub mod npc;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod testing;
pub mod trace;
pub mod viewer;
pub mod world;

// Primary public API
pub use fusion::fuse;
pub use npc::{NpcContext, NpcProfile};
pub use pipeline::{DialoguePipeline, DialogueState, PipelineError};
pub use router::{GraphIntent, GraphQuerySpec, GraphRouter, Intent, QueryRouter, QuerySpec};
pub use trace::{ToTrace, TraceEvent, TraceRecorder, TraceValue};
pub use viewer::{serve_viewer, viewer_router};
pub use world::{FactStore, KnowledgeGraph, RetrievalHit, WorldError};
