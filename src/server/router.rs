use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::config::AppSettings;
use crate::server::handlers::{chat, health, sessions};
use crate::state::AppState;

/// Creates the main application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Health and status endpoints
/// - The streaming chat endpoint
/// - Session management endpoints
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route("/chat", post(chat::chat))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/sessions",
            get(sessions::list_sessions)
                .post(sessions::create_session)
                .delete(sessions::clear_sessions),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/share",
            post(sessions::share_session),
        )
        .route("/api/share/:session_id", get(sessions::get_shared_session))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(settings: &AppSettings) -> CorsLayer {
    let mut origins = settings
        .server
        .cors_allowed_origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    if origins.is_empty() {
        origins = default_local_origins()
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
    }

    let mut allowed_headers = vec![
        header::ACCEPT,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-api-key"),
    ];
    match HeaderName::from_bytes(settings.auth.user_header.as_bytes()) {
        Ok(name) => allowed_headers.push(name),
        Err(err) => tracing::warn!(
            "Ignoring invalid identity header name {:?}: {}",
            settings.auth.user_header,
            err
        ),
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(allowed_headers)
        .expose_headers([HeaderName::from_static(chat::SESSION_ID_HEADER)])
}

fn default_local_origins() -> Vec<&'static str> {
    vec![
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
}
