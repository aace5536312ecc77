use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::security::{require_identity, UserIdentity};
use crate::history::SessionRecord;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default, alias = "sessionId")]
    pub id: Option<String>,
}

fn session_json(session: &SessionRecord) -> Value {
    json!({
        "id": session.session_id,
        "userId": session.user_id,
        "title": session.title(),
        "createdAt": session.created_at,
        "path": session.path(),
        "sharePath": session.share_path(),
        "messages": session.transcript,
    })
}

/// Loads a session the caller owns.
async fn owned_session(
    state: &AppState,
    identity: &UserIdentity,
    session_id: &str,
) -> Result<SessionRecord, ApiError> {
    let session = state
        .memory
        .get(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    if session.user_id != identity.user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(session)
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let payload = payload.map(|Json(body)| body).unwrap_or_default();

    let session_id = payload
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .memory
        .create_session(&session_id, &identity.user_id)
        .await?;

    Ok(Json(json!({
        "session": {
            "id": session_id,
            "userId": identity.user_id,
            "path": format!("/chat/{}", session_id),
        }
    })))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let sessions = state.memory.list_sessions(&identity.user_id).await?;
    let result: Vec<Value> = sessions.iter().map(session_json).collect();
    Ok(Json(json!({ "sessions": result })))
}

pub async fn clear_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let sessions = state.memory.list_sessions(&identity.user_id).await?;

    for session in &sessions {
        state.memory.delete(&session.session_id).await?;
    }
    tracing::info!("Cleared {} sessions for {}", sessions.len(), identity.user_id);

    Ok(Json(json!({ "success": true, "deleted": sessions.len() })))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let session = owned_session(&state, &identity, &session_id).await?;
    Ok(Json(json!({ "session": session_json(&session) })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    owned_session(&state, &identity, &session_id).await?;
    state.memory.delete(&session_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn share_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = require_identity(&headers, &state.settings.auth)?;
    let mut session = owned_session(&state, &identity, &session_id).await?;

    let share_path = format!("/share/{}", session_id);
    state
        .memory
        .update_metadata(&session_id, json!({ "share_path": share_path }))
        .await?;

    let mut metadata = session.metadata.as_object().cloned().unwrap_or_default();
    metadata.insert("share_path".to_string(), Value::String(share_path));
    session.metadata = Value::Object(metadata);

    Ok(Json(json!({ "session": session_json(&session) })))
}

/// Public read of a shared session. No identity required.
pub async fn get_shared_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .memory
        .get(&session_id)
        .await?
        .filter(|session| session.share_path().is_some())
        .ok_or_else(|| ApiError::NotFound("Shared session not found".to_string()))?;

    Ok(Json(json!({ "session": session_json(&session) })))
}
