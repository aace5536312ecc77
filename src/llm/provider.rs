use async_trait::async_trait;

use super::types::{CompletionRequest, FragmentReceiver};
use crate::core::errors::ProviderError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// provider name for logs
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;

    /// chat completion (streaming). Dropping the receiver stops the upstream
    /// request.
    async fn stream(&self, request: CompletionRequest) -> Result<FragmentReceiver, ProviderError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// generate one embedding vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}
