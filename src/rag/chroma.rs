use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::store::{RetrievedDocument, VectorStore};
use crate::core::errors::ProviderError;

/// Chroma HTTP client scoped to one collection.
pub struct ChromaStore {
    base_url: String,
    auth_token: Option<String>,
    collection: String,
    collection_id: RwLock<Option<String>>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

/// Column-oriented query result; one inner list per query embedding.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl QueryResponse {
    fn into_documents(self) -> Vec<RetrievedDocument> {
        let documents = first_row(self.documents);
        let metadatas = first_row(self.metadatas);
        let distances = first_row(self.distances);

        documents
            .into_iter()
            .enumerate()
            .map(|(idx, content)| RetrievedDocument {
                content: content.unwrap_or_default(),
                metadata: metadatas
                    .get(idx)
                    .cloned()
                    .flatten()
                    .unwrap_or(Value::Null),
                score: distances
                    .get(idx)
                    .copied()
                    .flatten()
                    .map(|d| 1.0 - d)
                    .unwrap_or(0.0),
            })
            .collect()
    }
}

fn first_row<T>(columns: Option<Vec<Vec<T>>>) -> Vec<T> {
    columns
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
}

impl ChromaStore {
    pub fn new(base_url: &str, auth_token: Option<String>, collection: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|token| !token.is_empty()),
            collection: collection.into(),
            collection_id: RwLock::new(None),
            client: Client::new(),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn collection_id(&self) -> Result<String, ProviderError> {
        if let Some(id) = self.collection_id.read().await.as_ref() {
            return Ok(id.clone());
        }

        let mut cached = self.collection_id.write().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let url = format!(
            "{}/api/v1/collections/{}",
            self.base_url,
            urlencoding::encode(&self.collection)
        );
        let res = self.authorize(self.client.get(&url)).send().await?;
        let info: CollectionInfo = check(res, &self.collection).await?.json().await?;
        tracing::debug!("Resolved collection {} to {}", self.collection, info.id);
        *cached = Some(info.id.clone());
        Ok(info.id)
    }

    /// Forgets `stale` unless another caller already replaced it.
    async fn forget_collection_id(&self, stale: &str) {
        let mut cached = self.collection_id.write().await;
        if cached.as_deref() == Some(stale) {
            *cached = None;
        }
    }

    async fn query_collection(
        &self,
        collection_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<QueryResponse, ProviderError> {
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, collection_id);
        let body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });

        let res = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        Ok(check(res, &self.collection).await?.json().await?)
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn heartbeat(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let res = self.authorize(self.client.get(&url)).send().await?;
        check(res, "heartbeat").await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedDocument>, ProviderError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let collection_id = self.collection_id().await?;
        let response = match self.query_collection(&collection_id, embedding, k).await {
            // The collection was dropped and re-created under a new id.
            Err(ProviderError::NotFound(_)) => {
                tracing::info!(
                    "Collection {} id {} is stale, resolving again",
                    self.collection,
                    collection_id
                );
                self.forget_collection_id(&collection_id).await;
                let fresh = self.collection_id().await?;
                self.query_collection(&fresh, embedding, k).await?
            }
            other => other?,
        };

        let mut documents = response.into_documents();
        documents.truncate(k);
        Ok(documents)
    }
}

async fn check(res: Response, what: &str) -> Result<Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    // Chroma reports a missing collection as 404 on newer builds and as a
    // 500 naming the collection on older ones.
    if status == StatusCode::NOT_FOUND || body.contains("does not exist") {
        return Err(ProviderError::NotFound(format!("collection {}", what)));
    }
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}
