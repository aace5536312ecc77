//! Retrieval-augmented chat pipeline: formatter, prompt templates, the
//! provider-facing stages, the orchestrator and the persistence sink.

pub mod formatter;
pub mod orchestrator;
pub mod prompt;
pub mod sink;
pub mod stages;
pub mod stream;

pub use orchestrator::{ChatPipeline, PipelineInput, SessionContext};
pub use sink::PersistenceSink;
pub use stages::{QuerySynthesis, ResponseSynthesis, Retrieval};
pub use stream::{CompletionSignal, PipelineState, ResponseStream};
