//! Pipeline orchestrator.
//!
//! `invoke` returns a `ResponseStream` immediately and drives the run on a
//! spawned task:
//!
//! ```text
//! Idle -> QuerySynthesis -> Retrieving -> ContextBuilt -> Responding -> Completed
//!   \________________\______________\____________\____________\-----> Failed
//! ```
//!
//! The vector-store heartbeat runs while still `Idle`, so an unreachable
//! store fails the run before any completion call. `Completed` is entered
//! only after the caller has drained the stream; only then does the
//! persistence sink run. Dropping the stream cancels the run and the
//! in-flight provider call, and nothing is persisted.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::sink::PersistenceSink;
use super::stages::{FeedEvent, QuerySynthesis, ResponseSynthesis, Retrieval};
use super::stream::{CompletionSignal, PipelineState, ResponseStream, StreamEvent};
use crate::core::config::settings::AppSettings;
use crate::core::errors::{ApiError, PipelineError};
use crate::history::{MemoryStore, Role, TranscriptLine};
use crate::llm::{CompletionProvider, EmbeddingProvider};
use crate::rag::{ContextExtractor, VectorStore};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInput {
    /// Prior turns, oldest first. Never includes `latest`.
    pub history: Vec<TranscriptLine>,
    pub latest: String,
}

impl PipelineInput {
    pub fn new(history: Vec<TranscriptLine>, latest: impl Into<String>) -> Self {
        Self {
            history,
            latest: latest.into(),
        }
    }

    /// Splits a full transcript into history and the latest user turn.
    pub fn from_messages(mut messages: Vec<TranscriptLine>) -> Result<Self, ApiError> {
        let last = messages
            .pop()
            .ok_or_else(|| ApiError::BadRequest("messages must not be empty".to_string()))?;

        if last.role != Role::User {
            return Err(ApiError::BadRequest(
                "the last message must be a user message".to_string(),
            ));
        }
        if last.content.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "the last message must not be empty".to_string(),
            ));
        }

        Ok(Self::new(messages, last.content))
    }
}

pub struct ChatPipeline {
    query: QuerySynthesis,
    retrieval: Retrieval,
    extractor: ContextExtractor,
    response: ResponseSynthesis,
    sink: PersistenceSink,
}

/// Per-run channels the stages report through.
struct RunHandle {
    state: watch::Sender<PipelineState>,
    events: mpsc::Sender<StreamEvent>,
}

impl RunHandle {
    fn transition(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        tracing::debug!("Pipeline {:?} -> {:?}", previous, next);
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), PipelineError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PipelineError::Cancelled)
    }
}

impl ChatPipeline {
    pub fn new(
        query: QuerySynthesis,
        retrieval: Retrieval,
        extractor: ContextExtractor,
        response: ResponseSynthesis,
        sink: PersistenceSink,
    ) -> Self {
        Self {
            query,
            retrieval,
            extractor,
            response,
            sink,
        }
    }

    pub fn from_settings(
        settings: &AppSettings,
        completion: Arc<dyn CompletionProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self::new(
            QuerySynthesis::from_settings(completion.clone(), settings),
            Retrieval::from_settings(embedding, vector_store, settings),
            ContextExtractor::from_settings(&settings.retrieval),
            ResponseSynthesis::from_settings(completion, settings),
            PersistenceSink::new(memory, settings.timeouts.memory()),
        )
    }

    pub fn invoke(self: &Arc<Self>, session: SessionContext, input: PipelineInput) -> ResponseStream {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (drained_tx, drained_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let cancel = CancellationToken::new();

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "pipeline",
            session_id = %session.session_id,
            run_id = %run_id
        );

        let stream = ResponseStream::new(
            event_rx,
            drained_tx,
            CompletionSignal::new(completion_rx),
            state_rx,
            cancel.clone().drop_guard(),
        );

        let pipeline = Arc::clone(self);
        let run = RunHandle {
            state: state_tx,
            events: event_tx,
        };

        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    biased;
                    result = pipeline.execute(&run, &input, drained_rx) => result,
                    _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                };

                match outcome {
                    Ok(full_text) => {
                        run.transition(PipelineState::Completed);
                        let _ = completion_tx.send(Ok(full_text.clone()));
                        if let Err(err) = pipeline.sink.persist(&session, &input.latest, &full_text).await {
                            tracing::error!("Failed to persist exchange: {}", err);
                        }
                    }
                    Err(err) => {
                        run.transition(PipelineState::Failed);
                        if err == PipelineError::Cancelled {
                            tracing::info!("Pipeline cancelled by caller");
                        } else {
                            tracing::warn!("Pipeline failed: {}", err);
                        }
                        let _ = completion_tx.send(Err(err.clone()));
                        let _ = run.events.send(StreamEvent::Failed(err)).await;
                    }
                }
            }
            .instrument(span),
        );

        stream
    }

    async fn execute(
        &self,
        run: &RunHandle,
        input: &PipelineInput,
        drained: oneshot::Receiver<()>,
    ) -> Result<String, PipelineError> {
        self.retrieval.ensure_reachable().await?;

        run.transition(PipelineState::QuerySynthesis);
        let query = self.query.run(&input.history, &input.latest).await?;
        tracing::debug!("Synthesized query: {}", query);

        run.transition(PipelineState::Retrieving);
        let documents = self.retrieval.run(&query).await?;
        let context = self.extractor.build_context(&documents);

        run.transition(PipelineState::ContextBuilt);

        run.transition(PipelineState::Responding);
        let mut feed = self.response.start(&context, &input.latest).await?;
        let full_text = loop {
            match feed.next().await? {
                FeedEvent::Fragment(text) => run.emit(StreamEvent::Fragment(text)).await?,
                FeedEvent::Finished(text) => break text,
            }
        };
        drop(feed);

        run.emit(StreamEvent::Done).await?;
        drained.await.map_err(|_| PipelineError::Cancelled)?;
        Ok(full_text)
    }
}
