use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::errors::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Single user-turn request carrying a fully rendered prompt.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f64>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// One item of a streamed completion. A well-formed stream is any number of
/// fragments followed by exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    Fragment(String),
    Done { full_text: String },
}

pub type FragmentReceiver = mpsc::Receiver<Result<CompletionChunk, ProviderError>>;
