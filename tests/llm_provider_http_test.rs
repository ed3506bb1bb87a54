// ABOUTME: HTTP-level tests for the Gemini and Groq adapters against a local stub upstream
// ABOUTME: Verifies request shapes, streaming decode, error taxonomy and retry behavior
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::StreamExt;
use persona_chat_server::chat::{ChatEvent, ChatOrchestrator, ChatTurnRequest};
use persona_chat_server::config::ChatSettings;
use persona_chat_server::errors::ErrorCode;
use persona_chat_server::llm::sse_parser::RetryConfig;
use persona_chat_server::llm::{
    ChatMessage, ChatRequest, GeminiProvider, GroqProvider, LlmProvider,
};
use serde_json::Value;
use tokio::net::TcpListener;

// ============================================================================
// Stub upstream
// ============================================================================

#[derive(Clone)]
struct Canned {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Canned {
    fn sse(events: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: events.iter().map(|e| format!("data: {e}\r\n\r\n")).collect(),
        }
    }

    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_owned(),
        }
    }
}

struct Seen {
    uri: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Default)]
struct Upstream {
    responses: Mutex<VecDeque<Canned>>,
    seen: Mutex<Vec<Seen>>,
}

impl Upstream {
    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last_body(&self) -> Value {
        self.seen.lock().unwrap().last().unwrap().body.clone()
    }
}

async fn respond(
    State(upstream): State<Arc<Upstream>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    upstream.seen.lock().unwrap().push(Seen {
        uri: uri.to_string(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let canned = {
        let mut queue = upstream.responses.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("no canned response queued")
        }
    };
    (
        StatusCode::from_u16(canned.status).unwrap(),
        [("content-type", canned.content_type)],
        canned.body,
    )
        .into_response()
}

/// Start a stub that answers with `responses` in order, repeating the last
async fn start_upstream(responses: Vec<Canned>) -> (String, Arc<Upstream>) {
    let upstream = Arc::new(Upstream {
        responses: Mutex::new(responses.into()),
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .fallback(respond)
        .with_state(Arc::clone(&upstream));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), upstream)
}

fn persona_request() -> ChatRequest {
    ChatRequest::new(vec![
        ChatMessage::system("You are Sophie, a 26-year-old female from Lisbon."),
        ChatMessage::user("hi"),
        ChatMessage::assistant("Hey you"),
        ChatMessage::user("how are you?"),
    ])
    .with_temperature(0.9)
    .with_sampling(0.95, 40)
    .with_max_tokens(256)
}

async fn collect_text(provider: &dyn LlmProvider, request: &ChatRequest) -> String {
    let mut stream = provider
        .complete_stream(&request.clone().with_streaming())
        .await
        .unwrap();
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap().delta);
    }
    text
}

// ============================================================================
// Gemini
// ============================================================================

fn gemini(base: &str) -> GeminiProvider {
    GeminiProvider::new("gemini-test-key")
        .with_base_url(base)
        .with_retry(RetryConfig::disabled())
}

#[tokio::test]
async fn test_gemini_stream_request_shape_and_decode() {
    let (base, upstream) = start_upstream(vec![Canned::sse(&[
        r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"I'm "}]}}]}"#,
        r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"great, "},{"text":"thanks!"}]},"finishReason":"STOP"}]}"#,
    ])])
    .await;
    let provider = gemini(&base);

    let text = collect_text(&provider, &persona_request()).await;
    assert_eq!(text, "I'm great, thanks!");

    let seen = upstream.seen.lock().unwrap();
    let request = &seen[0];
    assert!(request.uri.contains("/models/gemini-2.5-flash:streamGenerateContent"));
    assert!(request.uri.contains("alt=sse"));
    assert_eq!(request.headers["x-goog-api-key"], "gemini-test-key");

    let contents = request.body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[1]["role"], "model");
    let last_text = contents[2]["parts"][0]["text"].as_str().unwrap();
    assert!(last_text.starts_with("You are Sophie"));
    assert!(last_text.ends_with("how are you?"));

    let config = &request.body["generationConfig"];
    assert_eq!(config["topK"], 40);
    assert_eq!(config["maxOutputTokens"], 256);
    assert_eq!(config["candidateCount"], 1);
}

#[tokio::test]
async fn test_gemini_complete_returns_full_text() {
    let (base, _upstream) = start_upstream(vec![Canned::json(
        200,
        r#"{"candidates":[{"content":{"parts":[{"text":"Hello there"}]},"finishReason":"STOP"}],
            "usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":3,"totalTokenCount":15}}"#,
    )])
    .await;

    let response = gemini(&base).complete(&persona_request()).await.unwrap();
    assert_eq!(response.content, "Hello there");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.unwrap().total_tokens, 15);
}

#[tokio::test]
async fn test_gemini_rate_limit_carries_wait_time() {
    let (base, _upstream) = start_upstream(vec![Canned::json(
        429,
        r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED",
            "message":"Quota exceeded for metric. Please retry in 6.406453963s."}}"#,
    )])
    .await;

    let Err(err) = gemini(&base).complete_stream(&persona_request()).await else {
        panic!("expected a rate limit");
    };
    assert_eq!(err.code, ErrorCode::ExternalRateLimited);
    assert_eq!(err.http_status(), 429);
    assert!(err.user_message().contains("7 seconds"));
}

#[tokio::test]
async fn test_gemini_invalid_key() {
    let (base, _upstream) = start_upstream(vec![Canned::json(
        400,
        r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","message":"API key not valid. Please pass a valid API key.",
            "details":[{"reason":"API_KEY_INVALID"}]}}"#,
    )])
    .await;

    let err = gemini(&base).complete(&persona_request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalAuthFailed);
    assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn test_gemini_retries_transient_failures_only() {
    let retry = RetryConfig {
        max_retries: 2,
        initial_delay_ms: 1,
        max_delay_ms: 5,
    };

    let (base, upstream) = start_upstream(vec![
        Canned::json(503, r#"{"error":{"code":503,"message":"overloaded"}}"#),
        Canned::json(200, r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#),
    ])
    .await;
    let provider = GeminiProvider::new("k")
        .with_base_url(&base)
        .with_retry(retry.clone());
    assert_eq!(provider.complete(&persona_request()).await.unwrap().content, "ok");
    assert_eq!(upstream.seen_count(), 2);

    let (base, upstream) = start_upstream(vec![Canned::json(
        429,
        r#"{"error":{"code":429,"message":"Please retry in 1s."}}"#,
    )])
    .await;
    let provider = GeminiProvider::new("k").with_base_url(&base).with_retry(retry);
    assert!(provider.complete(&persona_request()).await.is_err());
    assert_eq!(upstream.seen_count(), 1);
}

// ============================================================================
// Groq
// ============================================================================

fn groq(base: &str) -> GroqProvider {
    GroqProvider::new("groq-test-key")
        .with_base_url(base)
        .with_retry(RetryConfig::disabled())
}

#[tokio::test]
async fn test_groq_stream_request_shape_and_decode() {
    let (base, upstream) = start_upstream(vec![Canned::sse(&[
        r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"content":"Doing "},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"content":"well é"},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ])])
    .await;
    let provider = groq(&base);

    let text = collect_text(&provider, &persona_request()).await;
    assert_eq!(text, "Doing well \u{e9}");

    let seen = upstream.seen.lock().unwrap();
    let request = &seen[0];
    assert!(request.uri.ends_with("/chat/completions"));
    assert_eq!(request.headers["authorization"], "Bearer groq-test-key");

    let body = &request.body;
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][2]["role"], "assistant");
    assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    assert!(body.get("top_k").is_none());
    assert_eq!(body["max_tokens"], 256);
}

#[tokio::test]
async fn test_groq_quota_and_rate_limits_differ() {
    let (base, _upstream) = start_upstream(vec![Canned::json(
        429,
        r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#,
    )])
    .await;
    let err = groq(&base).complete(&persona_request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalQuotaExceeded);
    assert_eq!(err.http_status(), 503);

    let (base, upstream) = start_upstream(vec![Canned::json(
        429,
        r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#,
    )])
    .await;
    let err = groq(&base).complete(&persona_request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalRateLimited);
    assert_eq!(upstream.last_body()["stream"], false);
}

#[tokio::test]
async fn test_groq_bad_key_and_unknown_failure() {
    let (base, _upstream) = start_upstream(vec![Canned::json(
        401,
        r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
    )])
    .await;
    let err = groq(&base).complete(&persona_request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalAuthFailed);

    let (base, _upstream) = start_upstream(vec![Canned::json(500, "upstream exploded")]).await;
    let err = groq(&base).complete(&persona_request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalServiceError);
}

#[tokio::test]
async fn test_groq_mid_stream_rate_limit_discards_partial_reply() {
    let (base, _upstream) = start_upstream(vec![Canned::sse(&[
        r#"{"choices":[{"delta":{"content":"Hey "},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"content":"there"},"finish_reason":null}]}"#,
        r#"{"error":{"message":"Rate limit reached for model","type":"tokens","code":"rate_limit_exceeded"}}"#,
    ])])
    .await;

    let database = common::create_test_database().await.unwrap();
    let persona_id = common::seed_sophie(&database).await.unwrap();
    let user_id = common::create_funded_user(&database, 3).await.unwrap();
    let orchestrator =
        ChatOrchestrator::new(database.clone(), Arc::new(groq(&base)), ChatSettings::default());

    let turn = orchestrator
        .send_message(ChatTurnRequest {
            user_id: user_id.clone(),
            persona_id,
            message: "hi".to_owned(),
            conversation_id: None,
        })
        .await
        .unwrap();
    let conversation_id = turn.conversation_id.clone();
    let events: Vec<ChatEvent> = turn.events.collect().await;

    assert!(events.contains(&ChatEvent::Chunk("Hey ".to_owned())));
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Done { .. })));
    let Some(ChatEvent::Error { code, .. }) = events.last() else {
        panic!("turn should end with an error, got {events:?}");
    };
    assert_eq!(*code, ErrorCode::ExternalRateLimited);

    assert_eq!(database.credits().balance(&user_id).await.unwrap(), 3);
    assert_eq!(database.messages().count(&conversation_id).await.unwrap(), 0);
}
