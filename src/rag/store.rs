//! VectorStore trait: the similarity-search capability the retrieval stage
//! depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ProviderError;

/// A document returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    /// Opaque store metadata; carries the serialized node envelope.
    #[serde(default)]
    pub metadata: Value,
    /// Similarity score (higher = better).
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and status output.
    fn name(&self) -> &str;

    /// Lightweight reachability probe.
    async fn heartbeat(&self) -> Result<(), ProviderError>;

    /// Returns at most `k` nearest neighbours, best first, in the store's
    /// native order.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedDocument>, ProviderError>;
}
