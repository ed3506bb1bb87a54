// ABOUTME: In-process HTTP helpers for driving the persona chat router in tests
// ABOUTME: Sends requests through tower's oneshot and decodes JSON or chat event-stream bodies

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use persona_chat_server::chat::ChatFrame;
use persona_chat_server::client::ChatStreamDecoder;
use serde::{de::DeserializeOwned, Serialize};
use tower::ServiceExt;

/// A request under construction
pub struct AxumTestRequest {
    method: Method,
    uri: String,
    content_type: Option<String>,
    body: String,
}

impl AxumTestRequest {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            content_type: None,
            body: String::new(),
        }
    }

    /// `GET uri`
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    /// `POST uri`
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Serialize `data` as the JSON body
    pub fn json<T: Serialize>(self, data: &T) -> Self {
        let body = serde_json::to_string(data).expect("Failed to serialize JSON");
        self.raw_body(&body, "application/json")
    }

    /// Send `body` verbatim, e.g. to exercise malformed input
    pub fn raw_body(mut self, body: &str, content_type: &str) -> Self {
        body.clone_into(&mut self.body);
        self.content_type = Some(content_type.to_owned());
        self
    }

    /// Run the request through `app` and buffer the whole response
    ///
    /// Chat event streams close after their terminal frame, so buffering
    /// works for `text/event-stream` answers as well.
    pub async fn send(self, app: Router) -> AxumTestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(content_type) = self.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(Body::from(self.body))
            .expect("Failed to build request");

        let response = app.oneshot(request).await.expect("Router failed");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body")
            .to_vec();

        AxumTestResponse {
            status,
            content_type,
            body,
        }
    }
}

/// A fully buffered response
pub struct AxumTestResponse {
    status: StatusCode,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl AxumTestResponse {
    /// `Content-Type` header, if any
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body parsed as JSON
    pub fn json<T: DeserializeOwned>(self) -> T {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "Body is not the expected JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    /// Body decoded as chat event frames, in arrival order
    pub fn frames(self) -> Vec<ChatFrame> {
        let mut decoder = ChatStreamDecoder::new();
        let mut frames = decoder.feed(&self.body);
        frames.extend(decoder.finish());
        frames
    }

    /// Panic with the body when the status differs from `expected`
    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {expected}, got {}: {}",
            self.status,
            String::from_utf8_lossy(&self.body)
        );
        self
    }
}
