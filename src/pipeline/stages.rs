//! The three stages that talk to external providers. Each one owns its
//! provider handles and timeouts and maps provider failures into the
//! pipeline taxonomy.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::formatter::render_history;
use super::prompt::{query_prompt, response_prompt};
use crate::core::config::settings::{AppSettings, PersonaSettings};
use crate::core::errors::{PipelineError, ProviderError};
use crate::history::TranscriptLine;
use crate::llm::{CompletionChunk, CompletionProvider, CompletionRequest, EmbeddingProvider, FragmentReceiver};
use crate::rag::{RetrievedDocument, VectorStore};

/// Turns the conversation into a single vector-search query.
pub struct QuerySynthesis {
    provider: Arc<dyn CompletionProvider>,
    model: Option<String>,
    timeout: Duration,
}

impl QuerySynthesis {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: Option<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model,
            timeout,
        }
    }

    pub fn from_settings(provider: Arc<dyn CompletionProvider>, settings: &AppSettings) -> Self {
        Self::new(
            provider,
            settings.completion.query_model.clone(),
            settings.timeouts.completion(),
        )
    }

    pub async fn run(&self, history: &[TranscriptLine], latest: &str) -> Result<String, PipelineError> {
        let prompt = query_prompt(&render_history(history), latest);
        let request = CompletionRequest::from_prompt(prompt)
            .with_model(self.model.clone())
            .with_sampling(Some(0.0), None);

        let text = timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| PipelineError::generation(ProviderError::Timeout(self.timeout)))?
            .map_err(PipelineError::generation)?;

        let query = text.trim();
        if query.is_empty() {
            return Err(PipelineError::Generation(
                "query synthesis returned no text".to_string(),
            ));
        }

        // The latest message must survive into the query verbatim.
        if query.contains(latest.trim()) {
            Ok(query.to_string())
        } else {
            Ok(format!("{} {}", query, latest.trim()))
        }
    }
}

/// Embeds the query and runs a bounded similarity search.
pub struct Retrieval {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    heartbeat_timeout: Duration,
    embedding_timeout: Duration,
    query_timeout: Duration,
}

impl Retrieval {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k,
            heartbeat_timeout: Duration::from_secs(2),
            embedding_timeout: Duration::from_secs(15),
            query_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, heartbeat: Duration, embedding: Duration, query: Duration) -> Self {
        self.heartbeat_timeout = heartbeat;
        self.embedding_timeout = embedding;
        self.query_timeout = query;
        self
    }

    pub fn from_settings(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        settings: &AppSettings,
    ) -> Self {
        let timeouts = &settings.timeouts;
        Self::new(embedder, store, settings.retrieval.top_k).with_timeouts(
            timeouts.heartbeat(),
            timeouts.embedding(),
            timeouts.vector_query(),
        )
    }

    /// Heartbeat raced against its timeout.
    pub async fn ensure_reachable(&self) -> Result<(), PipelineError> {
        match timeout(self.heartbeat_timeout, self.store.heartbeat()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(PipelineError::Retrieval(format!(
                "{} is unreachable: {}",
                self.store.name(),
                err
            ))),
            Err(_) => Err(PipelineError::Retrieval(format!(
                "{} heartbeat timed out after {:?}",
                self.store.name(),
                self.heartbeat_timeout
            ))),
        }
    }

    pub async fn run(&self, query: &str) -> Result<Vec<RetrievedDocument>, PipelineError> {
        let embedding = timeout(self.embedding_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| PipelineError::retrieval(ProviderError::Timeout(self.embedding_timeout)))?
            .map_err(|err| PipelineError::Retrieval(format!("embedding failed: {}", err)))?;

        let mut documents = timeout(self.query_timeout, self.store.query(&embedding, self.top_k))
            .await
            .map_err(|_| PipelineError::retrieval(ProviderError::Timeout(self.query_timeout)))?
            .map_err(PipelineError::retrieval)?;

        documents.truncate(self.top_k);
        tracing::debug!("Retrieved {} documents", documents.len());
        Ok(documents)
    }
}

/// Streams the persona answer.
pub struct ResponseSynthesis {
    provider: Arc<dyn CompletionProvider>,
    persona: PersonaSettings,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl ResponseSynthesis {
    pub fn new(provider: Arc<dyn CompletionProvider>, persona: PersonaSettings) -> Self {
        Self {
            provider,
            persona,
            temperature: None,
            max_tokens: None,
            connect_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, idle: Duration) -> Self {
        self.connect_timeout = connect;
        self.idle_timeout = idle;
        self
    }

    pub fn from_settings(provider: Arc<dyn CompletionProvider>, settings: &AppSettings) -> Self {
        let mut stage = Self::new(provider, settings.persona.clone()).with_timeouts(
            settings.timeouts.completion(),
            settings.timeouts.stream_idle(),
        );
        stage.temperature = settings.completion.temperature;
        stage.max_tokens = settings.completion.max_tokens;
        stage
    }

    /// Opens the streaming completion call.
    pub async fn start(&self, context: &str, latest: &str) -> Result<ResponseFeed, PipelineError> {
        let prompt = response_prompt(&self.persona, context, latest);
        let request =
            CompletionRequest::from_prompt(prompt).with_sampling(self.temperature, self.max_tokens);

        let receiver = timeout(self.connect_timeout, self.provider.stream(request))
            .await
            .map_err(|_| PipelineError::generation(ProviderError::Timeout(self.connect_timeout)))?
            .map_err(PipelineError::generation)?;

        Ok(ResponseFeed {
            receiver,
            idle_timeout: self.idle_timeout,
            assembled: String::new(),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FeedEvent {
    Fragment(String),
    /// Terminal: the full response text.
    Finished(String),
}

/// Live handle on a streaming completion. Dropping it cancels the upstream
/// call.
pub struct ResponseFeed {
    receiver: FragmentReceiver,
    idle_timeout: Duration,
    assembled: String,
}

impl ResponseFeed {
    pub async fn next(&mut self) -> Result<FeedEvent, PipelineError> {
        let item = timeout(self.idle_timeout, self.receiver.recv())
            .await
            .map_err(|_| PipelineError::generation(ProviderError::Timeout(self.idle_timeout)))?;

        match item {
            Some(Ok(CompletionChunk::Fragment(text))) => {
                self.assembled.push_str(&text);
                Ok(FeedEvent::Fragment(text))
            }
            Some(Ok(CompletionChunk::Done { full_text })) => {
                if full_text.is_empty() {
                    Ok(FeedEvent::Finished(std::mem::take(&mut self.assembled)))
                } else {
                    Ok(FeedEvent::Finished(full_text))
                }
            }
            Some(Err(err)) => Err(PipelineError::generation(err)),
            None => Err(PipelineError::Generation(
                "completion stream ended without a terminal event".to_string(),
            )),
        }
    }
}
