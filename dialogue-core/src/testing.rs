//! Testing utilities: deterministic doubles for the generative backend and
//! the similarity index.
//!
//! Use these for integration tests without network calls. Both doubles are
//! cheaply cloneable and share their scripted state across clones, so a test
//! can keep a handle for assertions after handing one to the pipeline.

use crate::index::{IndexEntry, IndexError, IndexHit, SimilarityIndex};
use async_trait::async_trait;
use llm::{BackendError, TextBackend};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A backend that returns scripted replies in order.
///
/// An exhausted script fails like an unreachable backend, which is also the
/// convenient way to test failure absorption.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockBackendState>,
}

#[derive(Default)]
struct MockBackendState {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Ok(text.into()));
        self
    }

    /// Queue a backend failure.
    pub fn failure(self, message: impl Into<String>) -> Self {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Err(message.into()));
        self
    }

    /// Number of generate calls made so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextBackend for MockBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(BackendError::Network(message)),
            None => Err(BackendError::Network(
                "mock backend has no more scripted replies".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A similarity index that returns canned hits and records upserts.
#[derive(Clone, Default)]
pub struct StaticIndex {
    inner: Arc<StaticIndexState>,
}

#[derive(Default)]
struct StaticIndexState {
    hits: Mutex<Vec<IndexHit>>,
    upserted: Mutex<Vec<IndexEntry>>,
    queries: AtomicUsize,
}

impl StaticIndex {
    /// An index that answers every query with nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An index that answers every query with the given hits.
    pub fn with_hits(hits: Vec<IndexHit>) -> Self {
        let index = Self::default();
        *index.inner.hits.lock().unwrap() = hits;
        index
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    /// Entries upserted so far.
    pub fn upserted(&self) -> Vec<IndexEntry> {
        self.inner.upserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimilarityIndex for StaticIndex {
    async fn query(&self, _text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        let hits = self.inner.hits.lock().unwrap();
        Ok(hits.iter().take(k).cloned().collect())
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        self.inner.upserted.lock().unwrap().extend(entries);
        Ok(())
    }
}

/// Build an [`IndexHit`] with the metadata keys the fact store expects.
pub fn index_hit(id: &str, document: &str, entity_id: &str, entity_name: &str, distance: f64) -> IndexHit {
    IndexHit {
        id: id.to_string(),
        document: document.to_string(),
        metadata: [
            ("entity_id".to_string(), entity_id.to_string()),
            ("entity_name".to_string(), entity_name.to_string()),
            ("type".to_string(), "lore".to_string()),
            ("source".to_string(), "index".to_string()),
            ("tags".to_string(), String::new()),
        ]
        .into_iter()
        .collect(),
        distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_scripted_order() {
        let backend = MockBackend::new().reply("first").reply("second");
        assert_eq!(backend.generate("x").await.unwrap(), "first");
        assert_eq!(backend.generate("x").await.unwrap(), "second");
        assert!(backend.generate("x").await.is_err());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_scripted_failure() {
        let backend = MockBackend::new().failure("down for maintenance");
        let err = backend.generate("x").await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }

    #[tokio::test]
    async fn test_static_index_truncates_to_k() {
        let index = StaticIndex::with_hits(vec![
            index_hit("f1", "a", "e1", "A", 0.1),
            index_hit("f2", "b", "e1", "A", 0.2),
            index_hit("f3", "c", "e1", "A", 0.3),
        ]);
        let hits = index.query("anything", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(index.query_count(), 1);
    }
}
