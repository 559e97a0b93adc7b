//! In-memory knowledge graph with bounded neighbor traversal.

use super::model::{load_edges, load_entities, WorldEdge, WorldEntity, WorldError};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Immutable entity/edge graph with alias lookup and breadth-first
/// neighbor expansion.
///
/// Built once at startup; safe to share across threads without locking.
pub struct KnowledgeGraph {
    entities: HashMap<String, WorldEntity>,
    edges: Vec<WorldEdge>,
    name_index: HashMap<String, String>,
    out_edges: HashMap<String, Vec<usize>>,
    in_edges: HashMap<String, Vec<usize>>,
}

impl KnowledgeGraph {
    /// Build the graph from already-loaded collections.
    pub fn new(entities: Vec<WorldEntity>, edges: Vec<WorldEdge>) -> Self {
        let mut graph = Self {
            entities: HashMap::new(),
            edges,
            name_index: HashMap::new(),
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
        };

        for entity in entities {
            graph.entities.insert(entity.id.clone(), entity);
        }

        for entity in graph.entities.values() {
            graph
                .name_index
                .insert(entity.name.to_lowercase(), entity.id.clone());
            for alias in &entity.aliases {
                graph
                    .name_index
                    .insert(alias.to_lowercase(), entity.id.clone());
            }
        }

        for (idx, edge) in graph.edges.iter().enumerate() {
            graph
                .out_edges
                .entry(edge.source_id.clone())
                .or_default()
                .push(idx);
            graph
                .in_edges
                .entry(edge.target_id.clone())
                .or_default()
                .push(idx);
        }

        graph
    }

    /// Load the graph from its two JSON files.
    pub fn load(
        entities_path: impl AsRef<Path>,
        edges_path: impl AsRef<Path>,
    ) -> Result<Self, WorldError> {
        let entities = load_entities(entities_path)?;
        let edges = load_edges(edges_path)?;
        Ok(Self::new(entities, edges))
    }

    /// Look up an entity by id.
    pub fn get_entity(&self, entity_id: &str) -> Option<&WorldEntity> {
        self.entities.get(entity_id)
    }

    /// Look up an entity by name or alias, case-insensitively.
    pub fn get_entity_by_name(&self, name: &str) -> Option<&WorldEntity> {
        if name.is_empty() {
            return None;
        }
        let entity_id = self.name_index.get(&name.trim().to_lowercase())?;
        self.entities.get(entity_id)
    }

    /// Outgoing edges of an entity, optionally filtered by edge type.
    pub fn get_edges(&self, source_id: &str, edge_type: Option<&str>) -> Vec<&WorldEdge> {
        let Some(indices) = self.out_edges.get(source_id) else {
            return Vec::new();
        };
        indices
            .iter()
            .map(|&idx| &self.edges[idx])
            .filter(|edge| edge_type.map_or(true, |t| edge.kind == t))
            .collect()
    }

    /// Incoming edges of an entity.
    pub fn get_incoming_edges(&self, target_id: &str) -> Vec<&WorldEdge> {
        let Some(indices) = self.in_edges.get(target_id) else {
            return Vec::new();
        };
        indices.iter().map(|&idx| &self.edges[idx]).collect()
    }

    /// Breadth-first neighbor expansion from `entity_id`, up to `depth` levels.
    ///
    /// At each level every frontier node's outgoing edges are visited in store
    /// order, filtered by `edge_types` when given. A target joins the next
    /// frontier only the first time it is reached; collected edges keep
    /// encounter order. The visited set dedups targets, not edges, so the same
    /// node pair may appear more than once when reached from distinct frontier
    /// members at the same level.
    pub fn get_neighbors(
        &self,
        entity_id: &str,
        edge_types: Option<&[String]>,
        depth: usize,
    ) -> Vec<WorldEdge> {
        if depth == 0 {
            return Vec::new();
        }

        let mut frontier = vec![entity_id.to_string()];
        let mut visited: HashSet<String> = frontier.iter().cloned().collect();
        let mut collected = Vec::new();

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for current in &frontier {
                let Some(indices) = self.out_edges.get(current) else {
                    continue;
                };
                for &idx in indices {
                    let edge = &self.edges[idx];
                    if let Some(types) = edge_types {
                        if !types.iter().any(|t| *t == edge.kind) {
                            continue;
                        }
                    }
                    collected.push(edge.clone());
                    if visited.insert(edge.target_id.clone()) {
                        next_frontier.push(edge.target_id.clone());
                    }
                }
            }
            frontier = next_frontier;
        }

        collected
    }

    /// Number of entities in the graph.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str, aliases: &[&str]) -> WorldEntity {
        WorldEntity {
            id: id.to_string(),
            name: name.to_string(),
            kind: "npc".to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    fn edge(id: &str, kind: &str, source: &str, target: &str) -> WorldEdge {
        WorldEdge {
            id: id.to_string(),
            kind: kind.to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            properties: Default::default(),
        }
    }

    fn sample_graph() -> KnowledgeGraph {
        KnowledgeGraph::new(
            vec![
                entity("e1", "Aldric", &["the tavern keeper"]),
                entity("e2", "Crooked Tavern", &[]),
                entity("e3", "Port Valor", &[]),
                entity("e4", "Marten", &[]),
            ],
            vec![
                edge("r1", "OWNS", "e1", "e2"),
                edge("r2", "LOCATED_IN", "e2", "e3"),
                edge("r3", "KINSHIP", "e1", "e4"),
                edge("r4", "LOCATED_IN", "e4", "e3"),
            ],
        )
    }

    #[test]
    fn test_alias_lookup_is_case_insensitive() {
        let graph = sample_graph();
        assert_eq!(graph.get_entity_by_name("aldric").unwrap().id, "e1");
        assert_eq!(graph.get_entity_by_name("ALDRIC").unwrap().id, "e1");
        assert_eq!(
            graph.get_entity_by_name("The Tavern Keeper").unwrap().id,
            "e1"
        );
        assert!(graph.get_entity_by_name("Aldri").is_none());
    }

    #[test]
    fn test_depth_zero_is_empty() {
        let graph = sample_graph();
        assert!(graph.get_neighbors("e1", None, 0).is_empty());
    }

    #[test]
    fn test_depth_one_keeps_store_order() {
        let graph = sample_graph();
        let edges = graph.get_neighbors("e1", None, 1);
        let ids: Vec<&str> = edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
    }

    #[test]
    fn test_edge_type_filter() {
        let graph = sample_graph();
        let edges = graph.get_neighbors("e1", Some(&["KINSHIP".to_string()]), 1);
        let ids: Vec<&str> = edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["r3"]);
    }

    #[test]
    fn test_depth_two_expands_frontier() {
        let graph = sample_graph();
        let edges = graph.get_neighbors("e1", None, 2);
        let ids: Vec<&str> = edges.iter().map(|e| e.id.as_str()).collect();
        // Level 1: e1 -> e2, e1 -> e4. Level 2: e2 -> e3, e4 -> e3.
        // e3 is only added to the frontier once, but both edges are kept.
        assert_eq!(ids, vec!["r1", "r3", "r2", "r4"]);
    }

    #[test]
    fn test_visited_target_not_reexpanded() {
        // A cycle must not loop: e1 -> e2 -> e1.
        let graph = KnowledgeGraph::new(
            vec![entity("e1", "A", &[]), entity("e2", "B", &[])],
            vec![
                edge("r1", "CONNECTS", "e1", "e2"),
                edge("r2", "CONNECTS", "e2", "e1"),
            ],
        );
        let edges = graph.get_neighbors("e1", None, 5);
        let ids: Vec<&str> = edges.iter().map(|e| e.id.as_str()).collect();
        // e1 is in the visited set from the start, so r2 is collected once
        // at level 2 and the walk stops.
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_unknown_entity_has_no_neighbors() {
        let graph = sample_graph();
        assert!(graph.get_neighbors("nope", None, 3).is_empty());
        assert!(graph.get_entity("nope").is_none());
    }
}
