use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::AppSettings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "auth_token",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 2] = ["max_tokens", "tokens"];

#[derive(Clone, Copy)]
enum EnvKind {
    Text,
    Integer,
}

/// Environment variables recognised as overrides, with the config path each
/// one writes. Later entries win, so aliases come first.
const ENV_OVERRIDES: [(&str, &[&str], EnvKind); 17] = [
    ("VECTOR_STORE_URL", &["vector_store", "url"], EnvKind::Text),
    ("VECTOR_STORE_TOKEN", &["vector_store", "auth_token"], EnvKind::Text),
    ("VECTOR_STORE_COLLECTION", &["vector_store", "collection"], EnvKind::Text),
    ("ZEP_URL", &["memory", "url"], EnvKind::Text),
    ("MEMORY_STORE_URL", &["memory", "url"], EnvKind::Text),
    ("ZEP_API_KEY", &["memory", "api_key"], EnvKind::Text),
    ("MEMORY_STORE_API_KEY", &["memory", "api_key"], EnvKind::Text),
    ("MEMORY_BACKEND", &["memory", "backend"], EnvKind::Text),
    ("EMBEDDING_DIMENSIONS", &["embedding", "dimensions"], EnvKind::Integer),
    ("RETRIEVAL_K", &["retrieval", "top_k"], EnvKind::Integer),
    ("COMPLETION_BASE_URL", &["completion", "base_url"], EnvKind::Text),
    ("COMPLETION_MODEL", &["completion", "model"], EnvKind::Text),
    ("OPENAI_API_KEY", &["completion", "api_key"], EnvKind::Text),
    ("OPENAI_API_KEY", &["embedding", "api_key"], EnvKind::Text),
    ("EMBEDDING_BASE_URL", &["embedding", "base_url"], EnvKind::Text),
    ("EMBEDDING_MODEL", &["embedding", "model"], EnvKind::Text),
    ("RAGCHAT_API_KEY", &["auth", "api_key"], EnvKind::Text),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("RAGCHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Merged config: `config.yml`, then `secrets.yaml`, then environment.
    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        let mut merged = deep_merge(&public_config, &secrets_config);
        apply_env_overrides(&mut merged, |key| env::var(key).ok());
        validate_config(&merged)?;
        Ok(merged)
    }

    pub fn load_settings(&self) -> Result<AppSettings, ApiError> {
        let config = self.load_config()?;
        tracing::debug!(
            config = %redact_sensitive_values(&config),
            "Effective configuration loaded"
        );
        settings_from_value(config)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

pub fn settings_from_value(config: Value) -> Result<AppSettings, ApiError> {
    serde_json::from_value(config)
        .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn apply_env_overrides<F>(config: &mut Value, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for (var, path, kind) in ENV_OVERRIDES {
        let Some(raw) = lookup(var) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = match kind {
            EnvKind::Text => Value::String(raw.to_string()),
            EnvKind::Integer => match raw.parse::<u64>() {
                Ok(number) => Value::from(number),
                Err(_) => {
                    tracing::warn!("Ignoring {}={}: expected an integer", var, raw);
                    continue;
                }
            },
        };
        ensure_object_path(config, path, value);
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
