use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ProviderError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn probe_json(name: &str, result: Result<Result<(), ProviderError>, tokio::time::error::Elapsed>) -> Value {
    match result {
        Ok(Ok(())) => json!({ "name": name, "ok": true }),
        Ok(Err(err)) => json!({ "name": name, "ok": false, "error": err.to_string() }),
        Err(_) => json!({ "name": name, "ok": false, "error": "timed out" }),
    }
}

/// Probes both backing stores concurrently.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let heartbeat_timeout = state.settings.timeouts.heartbeat();
    let memory_timeout: Duration = state.settings.timeouts.memory();

    let (vector, memory) = tokio::join!(
        tokio::time::timeout(heartbeat_timeout, state.vector_store.heartbeat()),
        tokio::time::timeout(memory_timeout, state.memory.health_check()),
    );

    let vector = probe_json(state.vector_store.name(), vector);
    let memory = probe_json(state.memory.name(), memory);
    let degraded = !(vector["ok"].as_bool().unwrap_or(false) && memory["ok"].as_bool().unwrap_or(false));

    Json(json!({
        "vector_store": vector,
        "memory_store": memory,
        "degraded": degraded,
    }))
}
