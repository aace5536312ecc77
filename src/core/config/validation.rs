use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
        validate_u64_field(
            server,
            "server.rate_limit_per_minute",
            "rate_limit_per_minute",
            0,
            100_000,
        )?;
    }

    if let Some(auth) = expect_optional_object(root, "auth")? {
        validate_optional_string_field(auth, "auth.api_key", "api_key")?;
        validate_optional_string_field(auth, "auth.user_header", "user_header")?;
    }

    if let Some(completion) = expect_optional_object(root, "completion")? {
        validate_url_field(completion, "completion.base_url", "base_url")?;
        validate_optional_string_field(completion, "completion.model", "model")?;
        validate_optional_string_field(completion, "completion.query_model", "query_model")?;
        validate_f64_field(completion, "completion.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(completion, "completion.max_tokens", "max_tokens", 1, 1_000_000)?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_url_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.dimensions", "dimensions", 1, 65_536)?;
    }

    if let Some(store) = expect_optional_object(root, "vector_store")? {
        validate_url_field(store, "vector_store.url", "url")?;
        validate_optional_string_field(store, "vector_store.auth_token", "auth_token")?;
        validate_optional_string_field(store, "vector_store.collection", "collection")?;
    }

    if let Some(memory) = expect_optional_object(root, "memory")? {
        validate_enum_field(memory, "memory.backend", "backend", &["zep", "sqlite"])?;
        validate_url_field(memory, "memory.url", "url")?;
        validate_optional_string_field(memory, "memory.api_key", "api_key")?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 100)?;
        validate_optional_string_field(retrieval, "retrieval.envelope_key", "envelope_key")?;
        validate_string_array_field(retrieval, "retrieval.window_path", "window_path")?;
    }

    if let Some(persona) = expect_optional_object(root, "persona")? {
        validate_optional_string_field(persona, "persona.name", "name")?;
        validate_optional_string_field(persona, "persona.style", "style")?;
    }

    if let Some(timeouts) = expect_optional_object(root, "timeouts")? {
        for key in [
            "completion_secs",
            "stream_idle_secs",
            "embedding_secs",
            "vector_query_secs",
            "memory_secs",
        ] {
            validate_u64_field(timeouts, &format!("timeouts.{}", key), key, 1, 3_600)?;
        }
        validate_u64_field(timeouts, "timeouts.heartbeat_ms", "heartbeat_ms", 1, 60_000)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if allowed.contains(&text) {
        return Ok(());
    }
    Err(ApiError::BadRequest(format!(
        "Invalid config at '{}': expected one of {}",
        path,
        allowed.join(", ")
    )))
}

fn validate_url_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    match reqwest::Url::parse(text) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': expected an http(s) URL",
            path
        ))),
    }
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
