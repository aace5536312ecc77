//! Client for a Zep-style session-memory service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{MemoryStore, Role, SessionRecord, TranscriptLine};
use crate::core::errors::ProviderError;

#[derive(Clone)]
pub struct ZepMemoryStore {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ZepSession {
    session_id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ZepMemory {
    #[serde(default)]
    messages: Vec<ZepMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ZepMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role_type: Option<String>,
    content: String,
}

impl ZepMessage {
    fn from_line(line: &TranscriptLine) -> Self {
        let (role, role_type) = match line.role {
            Role::User => ("human", "user"),
            Role::Assistant => ("ai", "assistant"),
        };
        Self {
            role: role.to_string(),
            role_type: Some(role_type.to_string()),
            content: line.content.clone(),
        }
    }

    fn into_line(self) -> TranscriptLine {
        let role = self
            .role_type
            .as_deref()
            .map(Role::normalize)
            .unwrap_or_else(|| Role::normalize(&self.role));
        TranscriptLine {
            role,
            content: self.content,
        }
    }
}

impl ZepMemoryStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            client: Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn ensure_user(&self, user_id: &str) -> Result<(), ProviderError> {
        let path = format!("/api/v1/user/{}", urlencoding::encode(user_id));
        let res = self.request(Method::GET, &path).send().await?;
        if res.status().is_success() {
            return Ok(());
        }
        if res.status() != StatusCode::NOT_FOUND {
            check(res).await?;
            return Ok(());
        }

        tracing::info!("Creating memory-store user {}", user_id);
        let res = self
            .request(Method::POST, "/api/v1/user")
            .json(&json!({ "user_id": user_id, "metadata": {} }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<ZepSession>, ProviderError> {
        let path = format!("/api/v1/sessions/{}", urlencoding::encode(session_id));
        let res = self.request(Method::GET, &path).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let session = check(res).await?.json::<ZepSession>().await?;
        Ok(Some(session))
    }

    async fn fetch_transcript(&self, session_id: &str) -> Result<Vec<TranscriptLine>, ProviderError> {
        let path = format!("/api/v1/sessions/{}/memory", urlencoding::encode(session_id));
        let res = self.request(Method::GET, &path).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let memory = check(res).await?.json::<ZepMemory>().await?;
        Ok(memory
            .messages
            .into_iter()
            .map(ZepMessage::into_line)
            .collect())
    }

    async fn post_memory(&self, session_id: &str, lines: &[TranscriptLine]) -> Result<(), ProviderError> {
        let path = format!("/api/v1/sessions/{}/memory", urlencoding::encode(session_id));
        let messages: Vec<ZepMessage> = lines.iter().map(ZepMessage::from_line).collect();
        let res = self
            .request(Method::POST, &path)
            .json(&json!({ "messages": messages }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn into_record(&self, session: ZepSession) -> Result<SessionRecord, ProviderError> {
        let transcript = self.fetch_transcript(&session.session_id).await?;
        Ok(SessionRecord {
            user_id: session.user_id.unwrap_or_default(),
            created_at: session.created_at.unwrap_or_else(Utc::now),
            metadata: session
                .metadata
                .unwrap_or_else(|| Value::Object(Map::new())),
            session_id: session.session_id,
            transcript,
        })
    }
}

#[async_trait]
impl MemoryStore for ZepMemoryStore {
    fn name(&self) -> &str {
        "zep"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let res = self.request(Method::GET, "/healthz").send().await?;
        check(res).await?;
        Ok(())
    }

    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), ProviderError> {
        self.ensure_user(user_id).await?;

        let res = self
            .request(Method::POST, "/api/v1/sessions")
            .json(&json!({
                "session_id": session_id,
                "user_id": user_id,
                "metadata": { "title": "" },
            }))
            .send()
            .await?;
        if res.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        check(res).await?;
        tracing::info!("Session {} associated with user {}", session_id, user_id);
        Ok(())
    }

    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        lines: &[TranscriptLine],
    ) -> Result<(), ProviderError> {
        match self.fetch_session(session_id).await? {
            None => self.create_session(session_id, user_id).await?,
            Some(session) => {
                if let Some(owner) = session.user_id.as_deref() {
                    if owner != user_id {
                        return Err(ProviderError::Forbidden(format!(
                            "session {} belongs to another user",
                            session_id
                        )));
                    }
                }
            }
        }
        self.post_memory(session_id, lines).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, ProviderError> {
        match self.fetch_session(session_id).await? {
            Some(session) => Ok(Some(self.into_record(session).await?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, ProviderError> {
        let path = format!("/api/v1/user/{}/sessions", urlencoding::encode(user_id));
        let res = self.request(Method::GET, &path).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let sessions = check(res)
            .await?
            .json::<Option<Vec<ZepSession>>>()
            .await?
            .unwrap_or_default();

        let mut records = Vec::with_capacity(sessions.len());
        for session in sessions {
            records.push(self.into_record(session).await?);
        }
        Ok(records)
    }

    async fn delete(&self, session_id: &str) -> Result<(), ProviderError> {
        let path = format!("/api/v1/sessions/{}/memory", urlencoding::encode(session_id));
        let res = self.request(Method::DELETE, &path).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(res).await?;
        Ok(())
    }

    async fn update_metadata(&self, session_id: &str, metadata: Value) -> Result<(), ProviderError> {
        let path = format!("/api/v1/sessions/{}", urlencoding::encode(session_id));
        let res = self
            .request(Method::PATCH, &path)
            .json(&json!({ "session_id": session_id, "metadata": metadata }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }
}

async fn check(res: Response) -> Result<Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(body));
    }
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}
