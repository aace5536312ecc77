use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Json;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::security::require_identity;
use crate::history::TranscriptLine;
use crate::pipeline::{PipelineInput, SessionContext};
use crate::state::AppState;

pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, alias = "id")]
    pub session_id: Option<String>,
    pub messages: Vec<TranscriptLine>,
}

/// `POST /chat`: runs the pipeline and streams the answer as plain text.
///
/// Failures before the first fragment become a JSON error response; a
/// failure after streaming has started aborts the body.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let Json(payload) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    state.check_rate_limit(&identity.user_id)?;

    let input = PipelineInput::from_messages(payload.messages)?;
    let session_id = payload
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let session_header = HeaderValue::from_str(&session_id)
        .map_err(|_| ApiError::BadRequest("invalid session id".to_string()))?;

    let session = SessionContext {
        session_id,
        user_id: identity.user_id,
    };
    let mut responses = state.pipeline.invoke(session, input);

    let first = match responses.next().await {
        Some(Err(err)) => return Err(err.into()),
        other => other,
    };

    let body = Body::from_stream(stream::iter(first).chain(responses));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(SESSION_ID_HEADER, session_header)
        .body(body)
        .map_err(ApiError::internal)
}
