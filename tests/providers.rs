//! HTTP clients exercised against wiremock servers.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ragchat_backend::core::errors::ProviderError;
use ragchat_backend::history::{MemoryStore, Role, TranscriptLine, ZepMemoryStore};
use ragchat_backend::llm::{
    CompletionChunk, CompletionProvider, CompletionRequest, EmbeddingProvider, OpenAiProvider,
};
use ragchat_backend::rag::{ChromaStore, VectorStore};

fn sse_body(parts: &[&str], done: bool) -> String {
    let mut body = String::new();
    for part in parts {
        let event = json!({ "choices": [{ "delta": { "content": part } }] });
        body.push_str(&format!("data: {}\n\n", event));
    }
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

async fn drain(
    mut rx: ragchat_backend::llm::FragmentReceiver,
) -> Vec<Result<CompletionChunk, ProviderError>> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn completion_sends_bearer_token_and_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-test", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "tides and moons" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), Some("sk-test".to_string()), "gpt-test");
    let text = provider
        .complete(CompletionRequest::from_prompt("rewrite this"))
        .await
        .expect("completion");

    assert_eq!(text, "tides and moons");
}

#[tokio::test]
async fn completion_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "gpt-test");
    let err = provider
        .complete(CompletionRequest::from_prompt("hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Status { status: 429, .. }));
}

#[tokio::test]
async fn streamed_completion_yields_fragments_then_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Hel", "lo", "!"], true)),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "gpt-test");
    let rx = provider
        .stream(CompletionRequest::from_prompt("hi"))
        .await
        .expect("stream");
    let items = drain(rx).await;

    let chunks: Vec<CompletionChunk> = items.into_iter().map(|item| item.expect("chunk")).collect();
    assert_eq!(
        chunks,
        vec![
            CompletionChunk::Fragment("Hel".to_string()),
            CompletionChunk::Fragment("lo".to_string()),
            CompletionChunk::Fragment("!".to_string()),
            CompletionChunk::Done {
                full_text: "Hello!".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn stream_without_done_sentinel_ends_in_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["partial"], false)),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "gpt-test");
    let rx = provider
        .stream(CompletionRequest::from_prompt("hi"))
        .await
        .expect("stream");
    let items = drain(rx).await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(CompletionChunk::Fragment(text)) if text == "partial"));
    assert!(matches!(&items[1], Err(ProviderError::Transport(_))));
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "dimensions": 4 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3] }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "embed-test").with_dimensions(4);
    let err = provider.embed("query").await.unwrap_err();

    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[tokio::test]
async fn embedding_with_non_numeric_entry_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.5, "oops", 0.25] }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "embed-test");
    let err = provider.embed("query").await.unwrap_err();

    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[tokio::test]
async fn embedding_returns_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.5, 0.25] }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&server.uri(), None, "embed-test").with_dimensions(2);

    assert_eq!(provider.embed("query").await.expect("vector"), vec![0.5, 0.25]);
}

#[tokio::test]
async fn chroma_heartbeat_reflects_server_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nanosecond heartbeat": 1
        })))
        .mount(&server)
        .await;

    let store = ChromaStore::new(&server.uri(), None, "essays");
    assert!(store.heartbeat().await.is_ok());

    let down = ChromaStore::new("http://127.0.0.1:9", None, "essays");
    assert!(down.heartbeat().await.is_err());
}

#[tokio::test]
async fn chroma_query_resolves_collection_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/essays"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-123", "name": "essays"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c-123/query"))
        .and(body_partial_json(json!({ "n_results": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": [["a", "b"]],
            "documents": [["first", "second"]],
            "metadatas": [[{ "_node_content": "{}" }, null]],
            "distances": [[0.1, 0.4]]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let store = ChromaStore::new(&server.uri(), None, "essays");
    let first = store.query(&[0.1, 0.2], 2).await.expect("query");
    let second = store.query(&[0.3, 0.4], 2).await.expect("query");

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].content, "first");
    assert!(first[0].score > first[1].score);
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn chroma_recreated_collection_is_resolved_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/essays"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-old", "name": "essays"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/essays"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-new", "name": "essays"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c-old/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [["before"]],
            "distances": [[0.2]]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c-old/query"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Collection c-old does not exist."),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/c-new/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [["after"]],
            "distances": [[0.1]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = ChromaStore::new(&server.uri(), None, "essays");
    let before = store.query(&[0.1], 1).await.expect("query");
    let after = store.query(&[0.1], 1).await.expect("query after re-create");

    assert_eq!(before[0].content, "before");
    assert_eq!(after[0].content, "after");
}

#[tokio::test]
async fn chroma_missing_collection_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/missing"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Collection missing does not exist."),
        )
        .mount(&server)
        .await;

    let store = ChromaStore::new(&server.uri(), None, "missing");
    let err = store.query(&[0.1], 3).await.unwrap_err();

    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn zep_append_creates_unknown_session_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/s-1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("session not found"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/alice"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user"))
        .and(body_partial_json(json!({ "user_id": "alice" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "user_id": "alice" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions"))
        .and(body_partial_json(json!({ "session_id": "s-1", "user_id": "alice" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "session_id": "s-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions/s-1/memory"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "human", "role_type": "user", "content": "Hello" },
                { "role": "ai", "role_type": "assistant", "content": "Hi!" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = ZepMemoryStore::new(&server.uri(), None);
    store
        .append(
            "s-1",
            "alice",
            &[TranscriptLine::user("Hello"), TranscriptLine::assistant("Hi!")],
        )
        .await
        .expect("append");
}

#[tokio::test]
async fn zep_append_to_foreign_session_is_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "s-1",
            "user_id": "alice"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions/s-1/memory"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = ZepMemoryStore::new(&server.uri(), None);
    let err = store
        .append("s-1", "mallory", &[TranscriptLine::user("Injected")])
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Forbidden(_)));
}

#[tokio::test]
async fn zep_append_to_own_session_posts_directly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "s-1",
            "user_id": "alice"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions/s-1/memory"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = ZepMemoryStore::new(&server.uri(), None);
    store
        .append("s-1", "alice", &[TranscriptLine::user("Again")])
        .await
        .expect("append");
}

#[tokio::test]
async fn zep_get_normalizes_roles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/s-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "s-2",
            "user_id": "alice",
            "created_at": "2024-03-01T10:00:00Z",
            "metadata": { "share_path": "/share/s-2" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/s-2/memory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "role": "human", "content": "Question" },
                { "role": "ai", "content": "Answer" }
            ]
        })))
        .mount(&server)
        .await;

    let store = ZepMemoryStore::new(&server.uri(), None);
    let record = store.get("s-2").await.expect("get").expect("session");

    assert_eq!(record.user_id, "alice");
    assert_eq!(record.transcript[0].role, Role::User);
    assert_eq!(record.transcript[1].role, Role::Assistant);
    assert_eq!(record.share_path(), Some("/share/s-2"));
    assert_eq!(record.title(), "Question");
}

#[tokio::test]
async fn zep_unknown_session_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = ZepMemoryStore::new(&server.uri(), None);

    assert!(store.get("nope").await.expect("get").is_none());
}
