//! Fixed prompt templates for the two completion calls.

use crate::core::config::settings::PersonaSettings;

/// Asks the model for a vector-search query built from the conversation and
/// the latest message.
pub fn query_prompt(history: &str, latest: &str) -> String {
    let history = if history.trim().is_empty() {
        "(no previous messages)"
    } else {
        history
    };

    format!(
        "You write search queries for a vector database of reference documents.\n\
         Using the conversation below, write one search query that carries over \
         any earlier context needed to understand the latest message and that \
         contains the latest message in full.\n\
         Reply with the query only.\n\n\
         Conversation:\n{history}\n\n\
         Latest message:\n{latest}\n\n\
         Search query:"
    )
}

/// Persona prompt for the final, streamed answer.
pub fn response_prompt(persona: &PersonaSettings, context: &str, latest: &str) -> String {
    let context = if context.trim().is_empty() {
        "(no matching passages were found)"
    } else {
        context
    };

    format!(
        "You are {name}. {style}\n\
         Answer the question using the passages below. If they do not cover \
         the question, say so in your own voice instead of inventing details.\n\n\
         Passages:\n{context}\n\n\
         Question:\n{latest}\n\n\
         Answer:",
        name = persona.name,
        style = persona.style,
    )
}
