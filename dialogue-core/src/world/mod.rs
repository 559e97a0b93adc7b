//! Static world model: entities, edges, facts, and the stores built on them.

pub mod facts;
pub mod graph;
pub mod model;

pub use facts::{format_retrieval_results, FactStore, RetrievalHit, WorldHints, ENTITY_MATCH_SCORE};
pub use graph::KnowledgeGraph;
pub use model::{
    load_edges, load_entities, load_world_facts, WorldEdge, WorldEntity, WorldError, WorldFact,
};
