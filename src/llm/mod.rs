pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{CompletionProvider, EmbeddingProvider};
pub use types::{ChatMessage, CompletionChunk, CompletionRequest, FragmentReceiver};
