//! Context extraction.
//!
//! Retrieved documents carry their sentence window inside a serialized node
//! envelope stored under one metadata key, e.g.
//!
//! ```text
//! metadata["_node_content"] = "{\"metadata\": {\"window\": \"...\"}, ...}"
//! ```
//!
//! The extractor decodes that envelope, follows a configured path to the
//! window string and joins the windows of a result set into one prompt
//! block. A malformed document contributes nothing; it never fails the batch.

use serde_json::Value;

use super::store::RetrievedDocument;
use crate::core::config::settings::RetrievalSettings;

/// Separator placed between consecutive context windows.
pub const CONTEXT_DELIMITER: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct ContextExtractor {
    envelope_key: String,
    window_path: Vec<String>,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default())
    }
}

impl ContextExtractor {
    pub fn new(envelope_key: impl Into<String>, window_path: Vec<String>) -> Self {
        Self {
            envelope_key: envelope_key.into(),
            window_path,
        }
    }

    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self::new(settings.envelope_key.clone(), settings.window_path.clone())
    }

    /// Window text for one document, or an empty string when the metadata
    /// does not have the expected shape.
    pub fn extract_window(&self, document: &RetrievedDocument) -> String {
        let Some(envelope) = document.metadata.get(&self.envelope_key) else {
            return String::new();
        };

        // The envelope is normally a JSON string; some loaders store the
        // object directly.
        let decoded;
        let envelope = match envelope {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => {
                    decoded = value;
                    &decoded
                }
                Err(_) => return String::new(),
            },
            Value::Object(_) => envelope,
            _ => return String::new(),
        };

        self.window_path
            .iter()
            .try_fold(envelope, |node, key| node.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Non-empty windows joined in input order.
    pub fn build_context(&self, documents: &[RetrievedDocument]) -> String {
        documents
            .iter()
            .map(|doc| self.extract_window(doc))
            .filter(|window| !window.is_empty())
            .collect::<Vec<_>>()
            .join(CONTEXT_DELIMITER)
    }
}
