//! Typed application settings.
//!
//! The raw YAML value is validated first (see `validation`), then
//! deserialised into these structs. Every field has a default so that a
//! partial `config.yml` is enough to start the service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub completion: CompletionSettings,
    pub embedding: EmbeddingSettings,
    pub vector_store: VectorStoreSettings,
    pub memory: MemorySettings,
    pub retrieval: RetrievalSettings,
    pub persona: PersonaSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Chat requests allowed per user per minute. Zero disables the limit.
    pub rate_limit_per_minute: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            rate_limit_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared key the gateway must present in `x-api-key`. Unset means the
    /// identity header alone is trusted.
    pub api_key: Option<String>,
    pub user_header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            user_header: "x-user-id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Model used for query synthesis; falls back to `model`.
    pub query_model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            query_model: None,
            temperature: Some(0.7),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub url: String,
    pub auth_token: Option<String>,
    pub collection: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            auth_token: None,
            collection: "documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Zep,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub backend: MemoryBackend,
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::Zep,
            url: "http://localhost:8001".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Metadata key holding the serialized node envelope.
    pub envelope_key: String,
    /// Path inside the decoded envelope to the context window string.
    pub window_path: Vec<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 8,
            envelope_key: "_node_content".to_string(),
            window_path: vec!["metadata".to_string(), "window".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSettings {
    pub name: String,
    pub style: String,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            name: "the author".to_string(),
            style: "Speak in the first person, in the author's own voice and tone. \
                    Stay warm, concrete and conversational."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub completion_secs: u64,
    pub stream_idle_secs: u64,
    pub embedding_secs: u64,
    pub heartbeat_ms: u64,
    pub vector_query_secs: u64,
    pub memory_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            completion_secs: 60,
            stream_idle_secs: 30,
            embedding_secs: 15,
            heartbeat_ms: 2_000,
            vector_query_secs: 10,
            memory_secs: 10,
        }
    }
}

impl TimeoutSettings {
    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn vector_query(&self) -> Duration {
        Duration::from_secs(self.vector_query_secs)
    }

    pub fn memory(&self) -> Duration {
        Duration::from_secs(self.memory_secs)
    }
}
