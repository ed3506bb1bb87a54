// ABOUTME: Groq LLM provider using the flat OpenAI-compatible messages array
// ABOUTME: Sends the persona instruction as a leading system message and streams via SSE
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Groq Provider
//!
//! Implementation of [`LlmProvider`] for Groq's OpenAI-compatible endpoint.
//!
//! Set `GROQ_API_KEY`; `GROQ_API_BASE_URL` overrides the endpoint. Groq does
//! not accept top-k, so only temperature, top-p and the token ceiling are sent.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::sse_parser::{create_sse_stream, send_with_retry, RetryConfig};
use super::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider, MessageRole,
    StreamChunk, TokenUsage,
};
use crate::errors::AppError;

/// Default model to use
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Base URL for the Groq API (OpenAI-compatible)
const API_BASE_URL: &str = "https://api.groq.com/openai/v1";

const PROVIDER_NAME: &str = "Groq";

// ============================================================================
// API Request/Response Types (OpenAI-compatible format)
// ============================================================================

#[derive(Debug, Serialize)]
struct GroqRequest {
    model: String,
    messages: Vec<GroqMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct GroqMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for GroqMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
    #[serde(default)]
    usage: Option<GroqUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GroqStreamChunk {
    #[serde(default)]
    choices: Vec<GroqStreamChoice>,
    #[serde(default)]
    error: Option<GroqErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamChoice {
    delta: GroqDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqErrorResponse {
    error: GroqErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GroqErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Groq LLM provider
pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    retry: RetryConfig,
}

impl GroqProvider {
    /// Create a new Groq provider with the given API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: API_BASE_URL.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
            retry: RetryConfig::default_config(),
        }
    }

    /// Point the provider at a different endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Set a custom default model
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Override the initial-request retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    /// System messages go first regardless of where they appeared
    fn convert_messages(messages: &[ChatMessage]) -> Vec<GroqMessage> {
        let (system, rest): (Vec<_>, Vec<_>) = messages
            .iter()
            .partition(|m| m.role == MessageRole::System);
        system.into_iter().chain(rest).map(GroqMessage::from).collect()
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> GroqRequest {
        GroqRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn parse_stream_data(data: &str) -> Option<Result<StreamChunk, AppError>> {
        match serde_json::from_str::<GroqStreamChunk>(data) {
            Ok(chunk) => {
                if let Some(detail) = chunk.error {
                    warn!(message = %detail.message, "Groq stream reported an error");
                    return Some(Err(Self::classify_error(None, detail)));
                }
                let choice = chunk.choices.into_iter().next()?;
                Some(Ok(StreamChunk {
                    delta: choice.delta.content.unwrap_or_default(),
                    is_final: choice.finish_reason.is_some(),
                    finish_reason: choice.finish_reason,
                }))
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed Groq stream chunk");
                None
            }
        }
    }

    /// Map an error response to the failure taxonomy
    fn parse_error_response(status: u16, body: &str) -> AppError {
        let Ok(error_response) = serde_json::from_str::<GroqErrorResponse>(body) else {
            return match status {
                401 | 403 => AppError::auth_invalid(format!("{PROVIDER_NAME} rejected the API key")),
                429 => AppError::rate_limited(
                    "Too many messages right now. Please wait a moment and try again.",
                ),
                _ => AppError::external_service(
                    PROVIDER_NAME,
                    format!(
                        "API error ({status}): {}",
                        body.chars().take(200).collect::<String>()
                    ),
                ),
            };
        };

        Self::classify_error(Some(status), error_response.error)
    }

    /// Classify an error payload; `status` is `None` for errors sent mid-stream
    fn classify_error(status: Option<u16>, detail: GroqErrorDetail) -> AppError {
        let marker = format!(
            "{} {}",
            detail.error_type.as_deref().unwrap_or_default(),
            detail.code.as_deref().unwrap_or_default()
        );
        let rate_limited = status == Some(429) || marker.contains("rate_limit_exceeded");
        let over_quota = marker.contains("insufficient_quota")
            || (rate_limited && detail.message.to_lowercase().contains("quota"));

        if matches!(status, Some(401 | 403)) || marker.contains("invalid_api_key") {
            AppError::auth_invalid(format!(
                "{PROVIDER_NAME} API authentication failed: {}",
                detail.message
            ))
        } else if over_quota {
            AppError::quota_exceeded(PROVIDER_NAME, detail.message)
        } else if rate_limited {
            AppError::rate_limited(
                "Too many messages right now. Please wait a moment and try again.",
            )
            .with_details(serde_json::json!({ "upstream": detail.message }))
        } else {
            AppError::external_service(
                PROVIDER_NAME,
                format!("{} - {}", marker.trim(), detail.message),
            )
        }
    }

    async fn post(&self, body: &GroqRequest) -> Result<reqwest::Response, AppError> {
        let url = self.api_url("chat/completions");
        send_with_retry(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(body)
            },
            &self.retry,
            PROVIDER_NAME,
        )
        .await
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &'static str {
        "groq"
    }

    fn display_name(&self) -> &'static str {
        "Groq"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::STREAMING | LlmCapabilities::SYSTEM_MESSAGES
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.default_model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let groq_request = self.build_request(request, false);

        debug!("Sending request to Groq API");
        let response = self.post(&groq_request).await?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::external_service(PROVIDER_NAME, format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            error!(status = %status, "Groq API error");
            return Err(Self::parse_error_response(status.as_u16(), &body));
        }

        let groq_response: GroqResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::external_service(PROVIDER_NAME, format!("Failed to parse response: {e}"))
        })?;

        let choice = groq_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::external_service(PROVIDER_NAME, "No choices in response"))?;
        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() {
            return Err(AppError::external_service(PROVIDER_NAME, "Empty completion"));
        }

        Ok(ChatResponse {
            content,
            model: groq_response.model,
            usage: groq_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let groq_request = self.build_request(request, true);

        debug!("Starting streaming request to Groq API");
        let response = self.post(&groq_request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            error!(status = %status, "Groq streaming API error");
            return Err(Self::parse_error_response(status.as_u16(), &body));
        }

        Ok(create_sse_stream(
            response.bytes_stream(),
            Self::parse_stream_data,
            PROVIDER_NAME,
        ))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.api_url("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::external_service(PROVIDER_NAME, format!("Health check failed: {e}")))?;

        Ok(response.status().is_success())
    }
}

impl Debug for GroqProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GroqProvider")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn test_system_message_leads_and_roles_translate() {
        let provider = GroqProvider::new("key");
        let request = ChatRequest::new(vec![
            ChatMessage::user("earlier"),
            ChatMessage::assistant("reply"),
            ChatMessage::system("You are Mila."),
            ChatMessage::user("now"),
        ])
        .with_sampling(0.95, 40);
        let body = provider.build_request(&request, true);

        let roles: Vec<&str> = body.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body.messages[0].content, "You are Mila.");
        assert_eq!(body.model, DEFAULT_MODEL);

        let json = serde_json::to_value(&body).unwrap_or_default();
        assert!(json.get("top_k").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_error_taxonomy() {
        let rate = GroqProvider::parse_error_response(
            429,
            r#"{"error":{"message":"Rate limit reached for model","type":"tokens","code":"rate_limit_exceeded"}}"#,
        );
        assert_eq!(rate.code, ErrorCode::ExternalRateLimited);

        let quota = GroqProvider::parse_error_response(
            429,
            r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#,
        );
        assert_eq!(quota.code, ErrorCode::ExternalQuotaExceeded);

        let auth = GroqProvider::parse_error_response(
            401,
            r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        );
        assert_eq!(auth.code, ErrorCode::ExternalAuthFailed);

        let other = GroqProvider::parse_error_response(500, "<html>oops</html>");
        assert_eq!(other.code, ErrorCode::ExternalServiceError);
    }

    #[test]
    fn test_stream_delta_parsing() {
        let chunk = GroqProvider::parse_stream_data(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        );
        assert!(matches!(chunk, Some(Ok(StreamChunk { ref delta, .. })) if delta == "Hi"));

        // Usage-only trailer has no choices
        assert!(GroqProvider::parse_stream_data(r#"{"choices":[],"x_groq":{}}"#).is_none());
    }

    #[test]
    fn test_stream_error_payloads_are_classified() {
        let classify = |data: &str| {
            GroqProvider::parse_stream_data(data)
                .and_then(Result::err)
                .map(|e| e.code)
        };

        assert_eq!(
            classify(r#"{"error":{"message":"Rate limit reached for model","type":"tokens","code":"rate_limit_exceeded"}}"#),
            Some(ErrorCode::ExternalRateLimited)
        );
        assert_eq!(
            classify(r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#),
            Some(ErrorCode::ExternalQuotaExceeded)
        );
        assert_eq!(
            classify(r#"{"error":{"message":"Invalid API Key","code":"invalid_api_key"}}"#),
            Some(ErrorCode::ExternalAuthFailed)
        );
        assert_eq!(
            classify(r#"{"error":{"message":"model crashed","type":"server_error"}}"#),
            Some(ErrorCode::ExternalServiceError)
        );
    }
}
