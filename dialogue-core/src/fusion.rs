//! Retrieval fusion: merge ordered hit lists into one deduplicated list.

use crate::world::RetrievalHit;
use std::collections::HashSet;

/// Merge semantic, entity-linked, and graph-neighbor-linked hits, in that
/// fixed priority order. Hits are deduplicated by id with the first
/// occurrence winning; hits without an id are dropped.
pub fn fuse(
    semantic: Vec<RetrievalHit>,
    entity_linked: Vec<RetrievalHit>,
    neighbor_linked: Vec<RetrievalHit>,
) -> Vec<RetrievalHit> {
    let mut seen = HashSet::new();
    semantic
        .into_iter()
        .chain(entity_linked)
        .chain(neighbor_linked)
        .filter(|hit| !hit.id.is_empty() && seen.insert(hit.id.clone()))
        .collect()
}
