//! In-process fakes for the four provider capabilities.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Notify};

use ragchat_backend::core::config::AppSettings;
use ragchat_backend::core::errors::ProviderError;
use ragchat_backend::history::{MemoryStore, SessionRecord, TranscriptLine};
use ragchat_backend::llm::{
    CompletionChunk, CompletionProvider, CompletionRequest, EmbeddingProvider, FragmentReceiver,
};
use ragchat_backend::pipeline::{ChatPipeline, SessionContext};
use ragchat_backend::rag::{RetrievedDocument, VectorStore};
use ragchat_backend::state::{AppState, Providers};

/// How the fake streaming call behaves.
#[derive(Clone)]
pub enum StreamScript {
    /// All fragments, then the terminal event.
    Complete(Vec<String>),
    /// Some fragments, then the connection drops.
    DropAfter(Vec<String>),
    /// Some fragments, then nothing until the consumer goes away.
    Hang(Vec<String>),
}

pub fn fragments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

pub struct FakeCompletion {
    query_reply: Mutex<Result<String, String>>,
    script: Mutex<StreamScript>,
    pub complete_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
}

impl FakeCompletion {
    pub fn new(script: StreamScript) -> Self {
        Self {
            query_reply: Mutex::new(Ok("search: Hello".to_string())),
            script: Mutex::new(script),
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
        }
    }

    pub fn set_query_reply(&self, reply: Result<&str, &str>) {
        *self.query_reply.lock().unwrap() = reply.map(str::to_string).map_err(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst) + self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once a hanging stream has seen its consumer go away.
    pub async fn wait_cancelled(&self) {
        let notified = self.cancel_notify.notified();
        if self.was_cancelled() {
            return;
        }
        notified.await;
    }

    fn record(&self, request: &CompletionRequest) {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.record(&request);
        self.query_reply
            .lock()
            .unwrap()
            .clone()
            .map_err(ProviderError::Transport)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentReceiver, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(&request);
        let script = self.script.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(8);

        match script {
            StreamScript::Complete(parts) => {
                tokio::spawn(async move {
                    for part in &parts {
                        if tx.send(Ok(CompletionChunk::Fragment(part.clone()))).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Ok(CompletionChunk::Done {
                            full_text: parts.concat(),
                        }))
                        .await;
                });
            }
            StreamScript::DropAfter(parts) => {
                tokio::spawn(async move {
                    for part in parts {
                        let _ = tx.send(Ok(CompletionChunk::Fragment(part))).await;
                    }
                    let _ = tx
                        .send(Err(ProviderError::Transport("connection reset".to_string())))
                        .await;
                });
            }
            StreamScript::Hang(parts) => {
                let cancelled = self.cancelled.clone();
                let notify = self.cancel_notify.clone();
                tokio::spawn(async move {
                    for part in parts {
                        let _ = tx.send(Ok(CompletionChunk::Fragment(part))).await;
                    }
                    tx.closed().await;
                    cancelled.store(true, Ordering::SeqCst);
                    notify.notify_waiters();
                });
            }
        }

        Ok(rx)
    }
}

pub struct FakeEmbedding {
    pub calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl FakeEmbedding {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(vec![0.1, 0.2, 0.3, 0.4])
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Up,
    Down,
    Hanging,
}

pub struct FakeVectorStore {
    health: StoreHealth,
    documents: Vec<RetrievedDocument>,
    pub heartbeats: AtomicUsize,
    pub queries: AtomicUsize,
}

impl FakeVectorStore {
    pub fn new(health: StoreHealth, documents: Vec<RetrievedDocument>) -> Self {
        Self {
            health,
            documents,
            heartbeats: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    fn name(&self) -> &str {
        "fake-vectors"
    }

    async fn heartbeat(&self) -> Result<(), ProviderError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        match self.health {
            StoreHealth::Up => Ok(()),
            StoreHealth::Down => Err(ProviderError::Transport("connection refused".to_string())),
            StoreHealth::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    /// Ignores `k` so the caller's bound is what gets exercised.
    async fn query(&self, _embedding: &[f32], _k: usize) -> Result<Vec<RetrievedDocument>, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.clone())
    }
}

/// Document whose metadata carries a serialized node envelope.
pub fn windowed_document(window: &str, score: f32) -> RetrievedDocument {
    let node = json!({ "id_": window, "metadata": { "window": window } });
    RetrievedDocument {
        content: format!("chunk for {}", window),
        metadata: json!({ "_node_content": node.to_string() }),
        score,
    }
}

pub fn ranked_documents(count: usize) -> Vec<RetrievedDocument> {
    (0..count)
        .map(|i| windowed_document(&format!("window-{}", i), 1.0 - i as f32 * 0.05))
        .collect()
}

/// Session memory held in a map; records every append.
pub struct RecordingMemory {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    pub appends: AtomicUsize,
    fail_appends: AtomicBool,
    appended: Notify,
}

impl RecordingMemory {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            appends: AtomicUsize::new(0),
            fail_appends: AtomicBool::new(false),
            appended: Notify::new(),
        }
    }

    pub fn failing() -> Self {
        let memory = Self::new();
        memory.fail_appends.store(true, Ordering::SeqCst);
        memory
    }

    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn transcript(&self, session_id: &str) -> Vec<TranscriptLine> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.transcript.clone())
            .unwrap_or_default()
    }

    /// Waits until at least `n` appends were attempted.
    pub async fn wait_for_appends(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.append_count() < n {
                let notified = self.appended.notified();
                if self.append_count() >= n {
                    break;
                }
                notified.await;
            }
        })
        .await
        .expect("append was not observed in time");
    }

    fn insert_session(&self, session_id: &str, user_id: &str) {
        self.sessions
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                transcript: Vec::new(),
                created_at: Utc::now(),
                metadata: Value::Object(Map::new()),
            });
    }
}

#[async_trait]
impl MemoryStore for RecordingMemory {
    fn name(&self) -> &str {
        "recording"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), ProviderError> {
        self.insert_session(session_id, user_id);
        Ok(())
    }

    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        lines: &[TranscriptLine],
    ) -> Result<(), ProviderError> {
        let result = if self.fail_appends.load(Ordering::SeqCst) {
            Err(ProviderError::Status {
                status: 500,
                body: "memory store unavailable".to_string(),
            })
        } else {
            self.insert_session(session_id, user_id);
            match self.sessions.lock().unwrap().get_mut(session_id) {
                Some(session) if session.user_id != user_id => Err(ProviderError::Forbidden(
                    format!("session {} belongs to another user", session_id),
                )),
                Some(session) => {
                    session.transcript.extend_from_slice(lines);
                    Ok(())
                }
                None => Ok(()),
            }
        };

        self.appends.fetch_add(1, Ordering::SeqCst);
        self.appended.notify_waiters();
        result
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, ProviderError> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, ProviderError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, session_id: &str) -> Result<(), ProviderError> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn update_metadata(&self, session_id: &str, metadata: Value) -> Result<(), ProviderError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProviderError::NotFound(session_id.to_string()))?;
        if let (Some(existing), Value::Object(update)) = (session.metadata.as_object_mut(), metadata) {
            existing.extend(update);
        }
        Ok(())
    }
}

/// Settings with short timeouts and no rate limit.
pub fn test_settings() -> AppSettings {
    let mut settings = AppSettings::default();
    settings.server.rate_limit_per_minute = 0;
    settings.timeouts.heartbeat_ms = 100;
    settings.timeouts.completion_secs = 2;
    settings.timeouts.stream_idle_secs = 2;
    settings.timeouts.embedding_secs = 2;
    settings.timeouts.vector_query_secs = 2;
    settings.timeouts.memory_secs = 2;
    settings
}

pub struct Fakes {
    pub completion: Arc<FakeCompletion>,
    pub embedding: Arc<FakeEmbedding>,
    pub vector_store: Arc<FakeVectorStore>,
    pub memory: Arc<RecordingMemory>,
}

impl Fakes {
    pub fn new(script: StreamScript, health: StoreHealth, documents: Vec<RetrievedDocument>) -> Self {
        Self::with_memory(script, health, documents, RecordingMemory::new())
    }

    pub fn with_memory(
        script: StreamScript,
        health: StoreHealth,
        documents: Vec<RetrievedDocument>,
        memory: RecordingMemory,
    ) -> Self {
        Self {
            completion: Arc::new(FakeCompletion::new(script)),
            embedding: Arc::new(FakeEmbedding::new()),
            vector_store: Arc::new(FakeVectorStore::new(health, documents)),
            memory: Arc::new(memory),
        }
    }

    /// Happy-path fakes streaming the given fragments.
    pub fn healthy(parts: &[&str]) -> Self {
        Self::new(
            StreamScript::Complete(fragments(parts)),
            StoreHealth::Up,
            ranked_documents(3),
        )
    }

    pub fn providers(&self) -> Providers {
        Providers {
            completion: self.completion.clone(),
            embedding: self.embedding.clone(),
            vector_store: self.vector_store.clone(),
            memory: self.memory.clone(),
        }
    }

    pub fn pipeline(&self, settings: &AppSettings) -> Arc<ChatPipeline> {
        Arc::new(ChatPipeline::from_settings(
            settings,
            self.completion.clone(),
            self.embedding.clone(),
            self.vector_store.clone(),
            self.memory.clone(),
        ))
    }

    pub fn state(&self, settings: AppSettings) -> Arc<AppState> {
        AppState::from_parts(settings, self.providers())
    }

    /// Total calls that reached any external provider.
    pub fn external_calls(&self) -> usize {
        self.completion.calls()
            + self.embedding.calls.load(Ordering::SeqCst)
            + self.vector_store.heartbeats.load(Ordering::SeqCst)
            + self.vector_store.queries.load(Ordering::SeqCst)
            + self.memory.append_count()
    }
}

pub fn session(id: &str) -> SessionContext {
    SessionContext {
        session_id: id.to_string(),
        user_id: "user-1".to_string(),
    }
}
