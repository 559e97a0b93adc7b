//! Semantic similarity index client.
//!
//! Embedding computation and nearest-neighbor search live outside this
//! process; the core depends only on the query/upsert contract below and
//! ships a thin HTTP client for the external index service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the similarity index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Index error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// One ranked result from a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub distance: f64,
}

/// One document to upsert into the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Contract for the external semantic-similarity index.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Return up to `k` nearest documents for the query text.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError>;

    /// Insert or replace documents by id.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;
}

/// HTTP client for an external similarity index service.
///
/// Expects `POST {base}/query` with `{"text", "k"}` returning
/// `{"hits": [...]}`, and `POST {base}/upsert` with `{"entries": [...]}`.
#[derive(Clone)]
pub struct HttpSimilarityIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSimilarityIndex {
    /// Create a client for the index service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, IndexError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Api {
                status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| IndexError::Parse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    hits: Vec<IndexHit>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {}

#[async_trait]
impl SimilarityIndex for HttpSimilarityIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let response: QueryResponse = self.post("/query", &QueryRequest { text, k }).await?;
        Ok(response.hits)
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let _: UpsertResponse = self.post("/upsert", &UpsertRequest { entries }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let index = HttpSimilarityIndex::new("http://localhost:8900/");
        assert_eq!(index.base_url, "http://localhost:8900");
    }

    #[test]
    fn test_hit_metadata_defaults_empty() {
        let hit: IndexHit = serde_json::from_str(
            r#"{"id": "f1", "document": "Aldric keeps the tavern", "distance": 0.12}"#,
        )
        .unwrap();
        assert!(hit.metadata.is_empty());
    }
}
