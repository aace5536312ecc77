use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{CompletionProvider, EmbeddingProvider};
use super::types::{CompletionChunk, CompletionRequest, FragmentReceiver};
use crate::core::errors::ProviderError;

/// Client for any server speaking the OpenAI chat-completions and
/// embeddings protocol.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            model: model.into(),
            dimensions: None,
            client: Client::new(),
        }
    }

    /// Requests vectors of this length and rejects anything else.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body(&self, request: CompletionRequest, stream: bool) -> Value {
        let model = request.model.unwrap_or_else(|| self.model.clone());
        let mut body = json!({
            "model": model,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
            if let Some(s) = request.stop { obj.insert("stop".to_string(), json!(s)); }
        }
        body
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Skip,
    Done,
    Delta(String),
    Invalid(String),
}

/// Interprets one line of a chat-completions event stream.
pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    let payload: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => return SseLine::Invalid(format!("unparseable event: {}", err)),
    };
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseLine::Invalid(message);
    }

    match payload["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Delta(content.to_string()),
        _ => SseLine::Skip,
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let body = self.chat_body(request, false);
        let res = self.post("/v1/chat/completions").json(&body).send().await?;
        let payload: Value = check(res).await?.json().await?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("completion has no message content".to_string()))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentReceiver, ProviderError> {
        let body = self.chat_body(request, true);
        let res = self.post("/v1/chat/completions").json(&body).send().await?;
        let res = check(res).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            let mut full_text = String::new();

            loop {
                let item = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("Completion stream consumer went away");
                        return;
                    }
                    item = stream.next() => item,
                };

                let at_end = match item {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        false
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ProviderError::from(e))).await;
                        return;
                    }
                    None => {
                        // flush an unterminated last line
                        buffer.push(b'\n');
                        true
                    }
                };

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let done = CompletionChunk::Done {
                                full_text: std::mem::take(&mut full_text),
                            };
                            let _ = tx.send(Ok(done)).await;
                            return;
                        }
                        SseLine::Delta(text) => {
                            full_text.push_str(&text);
                            if tx.send(Ok(CompletionChunk::Fragment(text))).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Invalid(message) => {
                            let _ = tx.send(Err(ProviderError::Malformed(message))).await;
                            return;
                        }
                    }
                }

                if at_end {
                    let _ = tx
                        .send(Err(ProviderError::Transport(
                            "completion stream closed before [DONE]".to_string(),
                        )))
                        .await;
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "input": text,
        });
        if let (Some(obj), Some(dimensions)) = (body.as_object_mut(), self.dimensions) {
            obj.insert("dimensions".to_string(), json!(dimensions));
        }

        let res = self.post("/v1/embeddings").json(&body).send().await?;
        let payload: Value = check(res).await?.json().await?;

        let values = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("embedding response has no data".to_string()))?;
        let vector = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    ProviderError::Malformed(format!("embedding entry {} is not a number: {}", i, v))
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(ProviderError::Malformed(format!(
                    "embedding has {} dimensions, expected {}",
                    vector.len(),
                    expected
                )));
            }
        }
        Ok(vector)
    }
}
