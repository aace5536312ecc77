//! Retrieval: the vector-store capability, its Chroma client, and the
//! extraction of context windows from retrieved documents.

mod chroma;
mod context_builder;
mod store;

pub use chroma::ChromaStore;
pub use context_builder::{ContextExtractor, CONTEXT_DELIMITER};
pub use store::{RetrievedDocument, VectorStore};
