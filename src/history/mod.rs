//! Session memory: transcript types and the `MemoryStore` capability.
//!
//! Two backends implement the trait:
//! - `ZepMemoryStore` talks to a remote session-memory service
//! - `SqliteMemoryStore` keeps sessions in a local sqlite file

mod sqlite;
mod zep;

pub use sqlite::SqliteMemoryStore;
pub use zep::ZepMemoryStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::errors::ProviderError;

/// Maximum characters of the first message used as a session title.
const TITLE_MAX_CHARS: usize = 100;

/// Canonical speaker tag. Provider-specific names are folded into these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps an external role name onto the canonical pair.
    ///
    /// `ai`, `assistant` and `bot` become `Assistant`; everything else is
    /// treated as a user turn.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" | "ai" | "bot" => Role::Assistant,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::normalize(&raw))
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub role: Role,
    pub content: String,
}

impl TranscriptLine {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A durable, user-scoped conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub transcript: Vec<TranscriptLine>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl SessionRecord {
    /// First message truncated to 100 characters, or empty.
    pub fn title(&self) -> String {
        self.transcript
            .first()
            .map(|line| line.content.chars().take(TITLE_MAX_CHARS).collect())
            .unwrap_or_default()
    }

    pub fn path(&self) -> String {
        format!("/chat/{}", self.session_id)
    }

    pub fn share_path(&self) -> Option<&str> {
        self.metadata.get("share_path").and_then(|v| v.as_str())
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Backend name for logs and status output.
    fn name(&self) -> &str;

    /// Reachability probe.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// Creates the session (and its user, where the backend tracks users).
    async fn create_session(&self, session_id: &str, user_id: &str)
        -> Result<(), ProviderError>;

    /// Appends lines after the existing transcript. Historical entries are
    /// never rewritten. Unknown sessions are created on the fly.
    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        lines: &[TranscriptLine],
    ) -> Result<(), ProviderError>;

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, ProviderError>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, ProviderError>;

    async fn delete(&self, session_id: &str) -> Result<(), ProviderError>;

    /// Shallow-merges `metadata` into the session's metadata.
    async fn update_metadata(&self, session_id: &str, metadata: Value)
        -> Result<(), ProviderError>;
}
