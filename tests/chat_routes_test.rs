// ABOUTME: Route-level tests for chat, credit, persona and health endpoints
// ABOUTME: Drives the full router with a scripted provider and an in-memory database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use std::sync::Arc;

use axum::http::StatusCode;
use helpers::axum_test::AxumTestRequest;
use helpers::fake_provider::{FakeProvider, Script};
use persona_chat_server::errors::{AppError, ErrorCode};
use persona_chat_server::resources::ServerResources;
use persona_chat_server::routes::AppRoutes;
use serde_json::{json, Value};

struct Harness {
    resources: Arc<ServerResources>,
    provider: FakeProvider,
    user_id: String,
}

impl Harness {
    async fn new(credits: i64) -> Self {
        let provider = FakeProvider::new();
        let resources = common::create_test_server_resources(Arc::new(provider.clone()))
            .await
            .unwrap();
        common::seed_sophie(&resources.database).await.unwrap();
        let user_id = common::create_funded_user(&resources.database, credits)
            .await
            .unwrap();
        Self {
            resources,
            provider,
            user_id,
        }
    }

    fn router(&self) -> axum::Router {
        AppRoutes::router(Arc::clone(&self.resources))
    }

    fn send_body(&self, message: &str) -> Value {
        json!({
            "userId": self.user_id,
            "botProfileId": "sophie",
            "message": message,
        })
    }

    async fn balance(&self) -> i64 {
        let body: Value = AxumTestRequest::get(&format!("/api/credits/{}", self.user_id))
            .send(self.router())
            .await
            .assert_status(StatusCode::OK)
            .json();
        body["balance"].as_i64().unwrap()
    }
}

// ============================================================================
// POST /api/chat/send
// ============================================================================

#[tokio::test]
async fn test_send_streams_frames_and_bills_once() {
    let harness = Harness::new(5).await;
    harness.provider.push(Script::reply(&["Hi ", "gorgeous ", "\u{1f60f}"]));

    let response = AxumTestRequest::post("/api/chat/send")
        .json(&harness.send_body("hey Sophie"))
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK);
    assert!(response
        .content_type()
        .unwrap()
        .starts_with("text/event-stream"));

    let frames = response.frames();
    let conversation_id = frames[0].conversation_id.clone().expect("id frame first");

    let chunks: Vec<_> = frames.iter().filter_map(|f| f.chunk.clone()).collect();
    assert_eq!(chunks, vec!["Hi ", "gorgeous ", "\u{1f60f}"]);

    let done = frames.last().unwrap();
    assert_eq!(done.done, Some(true));
    assert_eq!(done.credits_used, Some(1));
    assert_eq!(done.response.as_deref(), Some("Hi gorgeous \u{1f60f}"));
    assert_eq!(done.conversation_id.as_deref(), Some(conversation_id.as_str()));

    assert_eq!(harness.balance().await, 4);
}

#[tokio::test]
async fn test_send_without_streaming_returns_json() {
    let harness = Harness::new(3).await;
    harness.provider.push(Script::reply(&["All ", "in ", "one"]));

    let mut body = harness.send_body("hello");
    body["stream"] = json!(false);
    let reply: Value = AxumTestRequest::post("/api/chat/send")
        .json(&body)
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK)
        .json();

    assert_eq!(reply["success"], true);
    assert_eq!(reply["response"], "All in one");
    assert_eq!(reply["creditsUsed"], 1);
    assert!(reply["conversationId"].as_str().is_some());
    assert_eq!(harness.balance().await, 2);
}

#[tokio::test]
async fn test_send_without_credits_is_payment_required() {
    let harness = Harness::new(0).await;

    let body: Value = AxumTestRequest::post("/api/chat/send")
        .json(&harness.send_body("hi"))
        .send(harness.router())
        .await
        .assert_status(StatusCode::PAYMENT_REQUIRED)
        .json();

    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
    assert!(body["response"].as_str().is_some());
    assert!(harness.provider.requests().is_empty());
}

#[tokio::test]
async fn test_send_rejects_malformed_and_blank_bodies() {
    let harness = Harness::new(5).await;

    let body: Value = AxumTestRequest::post("/api/chat/send")
        .raw_body("{\"userId\": ", "application/json")
        .send(harness.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json();
    assert_eq!(body["code"], "INVALID_INPUT");

    let body: Value = AxumTestRequest::post("/api/chat/send")
        .json(&harness.send_body("   "))
        .send(harness.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json();
    assert_eq!(body["success"], false);

    assert_eq!(harness.balance().await, 5);
}

#[tokio::test]
async fn test_send_to_unknown_persona_is_not_found() {
    let harness = Harness::new(5).await;

    let body: Value = AxumTestRequest::post("/api/chat/send")
        .json(&json!({
            "userId": harness.user_id,
            "personaId": "nobody",
            "message": "hello?",
        }))
        .send(harness.router())
        .await
        .assert_status(StatusCode::NOT_FOUND)
        .json();
    assert_eq!(body["code"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn test_upstream_rate_limit_arrives_as_error_frame() {
    let harness = Harness::new(5).await;
    harness.provider.push(Script::FailMidStream(vec!["Hm".to_owned()], || {
        AppError::rate_limited("Too many messages right now. Please try again in 9 seconds.")
    }));

    let response = AxumTestRequest::post("/api/chat/send")
        .json(&harness.send_body("hi"))
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK);
    let frames = response.frames();

    let last = frames.last().unwrap();
    assert!(last.error.as_deref().unwrap().contains("9 seconds"));
    assert_eq!(last.code, Some(ErrorCode::ExternalRateLimited));
    assert!(frames.iter().all(|f| f.done.is_none()));
    assert_eq!(harness.balance().await, 5);
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_conversation_and_message_history() {
    let harness = Harness::new(5).await;
    harness.provider.push(Script::reply(&["first reply"]));
    harness.provider.push(Script::reply(&["second reply"]));

    for message in ["one", "two"] {
        AxumTestRequest::post("/api/chat/send")
            .json(&harness.send_body(message))
            .send(harness.router())
            .await
            .assert_status(StatusCode::OK);
    }

    let list: Value = AxumTestRequest::get(&format!(
        "/api/chat/conversations?userId={}",
        harness.user_id
    ))
    .send(harness.router())
    .await
    .assert_status(StatusCode::OK)
    .json();
    let conversations = list["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["messageCount"], 2);
    assert_eq!(conversations[0]["personaId"], "sophie");

    let id = conversations[0]["id"].as_str().unwrap();
    let page: Value = AxumTestRequest::get(&format!(
        "/api/chat/conversations/{id}/messages?limit=3&offset=1"
    ))
    .send(harness.router())
    .await
    .assert_status(StatusCode::OK)
    .json();

    assert_eq!(page["total"], 4);
    let contents: Vec<_> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| (m["role"].as_str().unwrap(), m["content"].as_str().unwrap()))
        .collect();
    assert_eq!(
        contents,
        vec![("bot", "first reply"), ("user", "two"), ("bot", "second reply")]
    );
}

#[tokio::test]
async fn test_messages_of_unknown_conversation() {
    let harness = Harness::new(0).await;

    let body: Value = AxumTestRequest::get("/api/chat/conversations/missing/messages")
        .send(harness.router())
        .await
        .assert_status(StatusCode::NOT_FOUND)
        .json();
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
}

// ============================================================================
// Credits
// ============================================================================

#[tokio::test]
async fn test_credit_grant_and_history() {
    let harness = Harness::new(0).await;
    let uri = format!("/api/credits/{}", harness.user_id);

    let grant: Value = AxumTestRequest::post(&uri)
        .json(&json!({
            "amount": 25,
            "type": "purchase",
            "metadata": { "paymentRef": "pi_123" },
        }))
        .send(harness.router())
        .await
        .assert_status(StatusCode::CREATED)
        .json();
    assert_eq!(grant["balance"], 25);
    assert_eq!(grant["transaction"]["balanceBefore"], 0);
    assert_eq!(grant["transaction"]["metadata"]["paymentRef"], "pi_123");

    AxumTestRequest::post(&uri)
        .json(&json!({ "amount": 5, "type": "bonus", "description": "Welcome" }))
        .send(harness.router())
        .await
        .assert_status(StatusCode::CREATED);

    let history: Value = AxumTestRequest::get(&format!("{uri}/transactions?limit=10"))
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK)
        .json();
    let transactions = history["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["description"], "Welcome");
    assert_eq!(transactions[0]["balanceAfter"], 30);

    assert_eq!(harness.balance().await, 30);
}

#[tokio::test]
async fn test_credit_grant_rejects_non_positive_amounts() {
    let harness = Harness::new(0).await;

    let body: Value = AxumTestRequest::post(&format!("/api/credits/{}", harness.user_id))
        .json(&json!({ "amount": 0 }))
        .send(harness.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json();
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert_eq!(harness.balance().await, 0);
}

#[tokio::test]
async fn test_credit_grant_past_integer_range_is_bad_request() {
    let harness = Harness::new(1).await;
    let uri = format!("/api/credits/{}", harness.user_id);

    let body: Value = AxumTestRequest::post(&uri)
        .json(&json!({ "amount": i64::MAX, "type": "bonus" }))
        .send(harness.router())
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json();
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert_eq!(harness.balance().await, 1);
}

// ============================================================================
// Personas and health
// ============================================================================

#[tokio::test]
async fn test_persona_routes() {
    let harness = Harness::new(0).await;

    let list: Value = AxumTestRequest::get("/api/personas")
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(list["personas"][0]["id"], "sophie");

    let persona: Value = AxumTestRequest::get("/api/personas/sophie")
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(persona["displayName"], "Sophie");
    assert_eq!(persona["chatStyle"], "flirty");

    AxumTestRequest::get("/api/personas/ghost")
        .send(harness.router())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_provider() {
    let harness = Harness::new(0).await;

    let body: Value = AxumTestRequest::get("/health")
        .send(harness.router())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["provider"], "fake");
    assert_eq!(body["model"], "fake-model");
}
