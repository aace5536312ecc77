use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("too many requests")]
    TooManyRequests,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Terminal failure of a pipeline run.
///
/// Cloneable because the same error is delivered to the stream consumer and
/// to the completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Generation(err.to_string())
    }

    pub fn retrieval<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Retrieval(err.to_string())
    }

    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Generation(msg) => ApiError::BadGateway(msg),
            PipelineError::Retrieval(msg) => ApiError::ServiceUnavailable(msg),
            PipelineError::Persistence(msg) => ApiError::Internal(msg),
            PipelineError::Cancelled => ApiError::Internal("request cancelled".to_string()),
        }
    }
}

/// Error returned by an external capability (completion, embedding, vector
/// store, session memory).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => ApiError::NotFound(msg),
            ProviderError::Forbidden(_) => ApiError::Forbidden,
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}
