// ABOUTME: Google Gemini provider using the chat-with-history call pattern
// ABOUTME: Folds the persona instruction into the final user turn and streams via SSE
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Gemini Provider
//!
//! Implementation of [`LlmProvider`] for Google's Gemini models.
//!
//! The history is sent as alternating `user`/`model` turns. The persona
//! instruction is not sent as a `system_instruction`; it is prepended to the
//! final user turn as `"{system}\n\n{message}"`, which keeps the character
//! anchored right next to the message being answered.
//!
//! ## Configuration
//!
//! Set `GEMINI_API_KEY`. `GEMINI_API_BASE_URL` overrides the endpoint.

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
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL for the Gemini API
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider name used in errors and logs
const PROVIDER_NAME: &str = "Gemini";

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    candidate_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Google Gemini LLM provider
pub struct GeminiProvider {
    api_key: String,
    client: Client,
    base_url: String,
    default_model: String,
    retry: RetryConfig,
}

impl GeminiProvider {
    /// Create a new Gemini provider with an API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: API_BASE_URL.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
            retry: RetryConfig::default_config(),
        }
    }

    /// Point the provider at a different endpoint (proxies, test servers)
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

    fn build_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    const fn convert_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::System | MessageRole::User => "user",
            MessageRole::Assistant => "model",
        }
    }

    /// Translate the flat message list into Gemini turns
    ///
    /// Gemini requires the conversation to open with a user turn and to
    /// alternate roles, so leading model turns are dropped and consecutive
    /// turns from the same side are merged with a newline.
    fn convert_messages(messages: &[ChatMessage]) -> Vec<GeminiContent> {
        let system = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut turns: Vec<(&'static str, String)> = Vec::new();
        for message in messages.iter().filter(|m| m.role != MessageRole::System) {
            let role = Self::convert_role(message.role);
            match turns.last_mut() {
                Some((last_role, text)) if *last_role == role => {
                    text.push('\n');
                    text.push_str(&message.content);
                }
                None if role == "model" => {}
                _ => turns.push((role, message.content.clone())),
            }
        }

        if !system.is_empty() {
            match turns.last_mut() {
                Some((role, text)) if *role == "user" => {
                    *text = format!("{system}\n\n{text}");
                }
                _ => turns.push(("user", system)),
            }
        }

        turns
            .into_iter()
            .map(|(role, text)| GeminiContent {
                role: Some(role.to_owned()),
                parts: vec![ContentPart { text: Some(text) }],
            })
            .collect()
    }

    fn build_gemini_request(request: &ChatRequest) -> GeminiRequest {
        GeminiRequest {
            contents: Self::convert_messages(&request.messages),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                top_k: request.top_k,
                max_output_tokens: request.max_tokens,
                candidate_count: 1,
            },
        }
    }

    /// Concatenate every text part of the first candidate
    fn candidate_text(candidate: &Candidate) -> String {
        candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn convert_usage(metadata: &UsageMetadata) -> TokenUsage {
        TokenUsage {
            prompt_tokens: metadata.prompt_token_count.unwrap_or(0),
            completion_tokens: metadata.candidates_token_count.unwrap_or(0),
            total_tokens: metadata.total_token_count.unwrap_or(0),
        }
    }

    /// Parse one streamed SSE payload
    fn parse_stream_data(data: &str) -> Option<Result<StreamChunk, AppError>> {
        match serde_json::from_str::<GeminiResponse>(data) {
            Ok(response) => {
                if let Some(err) = response.error {
                    return Some(Err(Self::map_api_error(500, &err)));
                }
                let candidate = response.candidates?.into_iter().next()?;
                let delta = Self::candidate_text(&candidate);
                let is_final = candidate.finish_reason.is_some();
                Some(Ok(StreamChunk {
                    delta,
                    is_final,
                    finish_reason: candidate.finish_reason.map(|r| r.to_lowercase()),
                }))
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed Gemini stream chunk");
                None
            }
        }
    }

    /// Classify a non-success response body
    fn error_from_body(status: u16, body: &str) -> AppError {
        let err = serde_json::from_str::<GeminiErrorEnvelope>(body).map_or_else(
            |_| GeminiError {
                message: body.to_owned(),
                status: None,
                details: Vec::new(),
            },
            |envelope| envelope.error,
        );
        Self::map_api_error(status, &err)
    }

    /// Map an API error to the failure taxonomy
    ///
    /// A 429 is a rate limit unless the upstream names a spent quota and
    /// gives no time to wait.
    fn map_api_error(status: u16, err: &GeminiError) -> AppError {
        let details = serde_json::to_string(&err.details).unwrap_or_default();
        let invalid_key = err.message.contains("API key not valid")
            || details.contains("API_KEY_INVALID")
            || err.status.as_deref() == Some("UNAUTHENTICATED");

        if matches!(status, 401 | 403) || invalid_key {
            return AppError::auth_invalid(format!(
                "{PROVIDER_NAME} rejected the API key: {}",
                err.message
            ));
        }

        if status == 429 || err.status.as_deref() == Some("RESOURCE_EXHAUSTED") {
            let retry_after = Self::extract_retry_seconds(&err.message)
                .or_else(|| Self::retry_delay_from_details(&err.details));
            let names_quota = err.message.to_lowercase().contains("quota")
                || details.contains("QuotaFailure");

            return match retry_after {
                Some(seconds) => AppError::rate_limited(format!(
                    "Too many messages right now. Please try again in {seconds} seconds."
                )),
                None if names_quota => {
                    AppError::quota_exceeded(PROVIDER_NAME, err.message.clone())
                }
                None => AppError::rate_limited(
                    "Too many messages right now. Please wait a moment and try again.",
                )
                .with_details(serde_json::json!({ "upstream": err.message })),
            };
        }

        AppError::external_service(
            PROVIDER_NAME,
            format!("API error ({status}): {}", err.message),
        )
    }

    /// Pull the wait time out of "Please retry in 6.406453963s."
    fn extract_retry_seconds(message: &str) -> Option<u64> {
        const PREFIX: &str = "Please retry in ";
        let start = message.find(PREFIX)? + PREFIX.len();
        let rest = &message[start..];
        let end = rest.find('s')?;
        Self::whole_seconds(rest[..end].trim())
    }

    /// `retryDelay` of a `google.rpc.RetryInfo` detail, e.g. `"6s"`
    fn retry_delay_from_details(details: &[serde_json::Value]) -> Option<u64> {
        details
            .iter()
            .filter(|d| {
                d.get("@type")
                    .and_then(serde_json::Value::as_str)
                    .is_some_and(|t| t.ends_with("RetryInfo"))
            })
            .find_map(|d| {
                d.get("retryDelay")?
                    .as_str()?
                    .strip_suffix('s')
                    .and_then(Self::whole_seconds)
            })
    }

    /// Round a decimal seconds value up to at least one whole second
    fn whole_seconds(raw: &str) -> Option<u64> {
        let seconds = raw.parse::<f64>().ok()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = seconds.ceil() as u64;
        Some(rounded.max(1))
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response, AppError> {
        send_with_retry(
            || {
                self.client
                    .post(url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(body)
            },
            &self.retry,
            PROVIDER_NAME,
        )
        .await
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn display_name(&self) -> &'static str {
        "Google Gemini"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::STREAMING | LlmCapabilities::TOP_K
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.default_model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let url = self.build_url(model, "generateContent");
        let gemini_request = Self::build_gemini_request(request);

        debug!("Sending request to Gemini API");
        let response = self.post(&url, &gemini_request).await?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            AppError::external_service(PROVIDER_NAME, format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            error!(status = %status, "Gemini API error");
            return Err(Self::error_from_body(status.as_u16(), &response_text));
        }

        let gemini_response: GeminiResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                AppError::external_service(PROVIDER_NAME, format!("Failed to parse response: {e}"))
            })?;

        if let Some(err) = gemini_response.error {
            return Err(Self::map_api_error(status.as_u16(), &err));
        }

        let candidate = gemini_response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| AppError::external_service(PROVIDER_NAME, "No candidates in response"))?;
        let content = Self::candidate_text(candidate);
        if content.is_empty() {
            return Err(AppError::external_service(
                PROVIDER_NAME,
                format!(
                    "Empty completion (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        Ok(ChatResponse {
            content,
            model: model.to_owned(),
            usage: gemini_response.usage_metadata.as_ref().map(Self::convert_usage),
            finish_reason: candidate.finish_reason.as_ref().map(|r| r.to_lowercase()),
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let url = format!("{}?alt=sse", self.build_url(model, "streamGenerateContent"));
        let gemini_request = Self::build_gemini_request(request);

        debug!("Starting streaming request to Gemini API");
        let response = self.post(&url, &gemini_request).await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            error!(status = %status, "Gemini streaming API error");
            return Err(Self::error_from_body(status.as_u16(), &error_text));
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
            .get(format!("{}/models", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::external_service(PROVIDER_NAME, format!("Health check failed: {e}")))?;

        Ok(response.status().is_success())
    }
}

impl Debug for GeminiProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GeminiProvider")
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

    fn texts(contents: &[GeminiContent]) -> Vec<(String, String)> {
        contents
            .iter()
            .map(|c| {
                (
                    c.role.clone().unwrap_or_default(),
                    c.parts[0].text.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_system_prompt_folded_into_final_user_turn() {
        let messages = vec![
            ChatMessage::system("You are Sophie."),
            ChatMessage::user("hey"),
            ChatMessage::assistant("hi there 😊"),
            ChatMessage::user("how are you?"),
        ];
        let contents = GeminiProvider::convert_messages(&messages);

        assert_eq!(
            texts(&contents),
            vec![
                ("user".to_owned(), "hey".to_owned()),
                ("model".to_owned(), "hi there 😊".to_owned()),
                (
                    "user".to_owned(),
                    "You are Sophie.\n\nhow are you?".to_owned()
                ),
            ]
        );
    }

    #[test]
    fn test_leading_model_turns_dropped_and_runs_merged() {
        let messages = vec![
            ChatMessage::assistant("welcome back"),
            ChatMessage::user("one"),
            ChatMessage::user("two"),
        ];
        let contents = GeminiProvider::convert_messages(&messages);
        assert_eq!(
            texts(&contents),
            vec![("user".to_owned(), "one\ntwo".to_owned())]
        );
    }

    #[test]
    fn test_generation_config_carries_sampling() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(0.9)
            .with_sampling(0.95, 40)
            .with_max_tokens(256);
        let body = serde_json::to_value(GeminiProvider::build_gemini_request(&request))
            .unwrap_or_default();

        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["generationConfig"]["candidateCount"], 1);
    }

    #[test]
    fn test_rate_limit_with_retry_hint() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded for metric. Please retry in 6.406453963s.","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = GeminiProvider::error_from_body(429, body);
        assert_eq!(err.code, ErrorCode::ExternalRateLimited);
        assert!(err.message.contains("7 seconds"));
    }

    #[test]
    fn test_quota_without_retry_hint() {
        let body = r#"{"error":{"code":429,"message":"You exceeded your current quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = GeminiProvider::error_from_body(429, body);
        assert_eq!(err.code, ErrorCode::ExternalQuotaExceeded);
    }

    #[test]
    fn test_retry_delay_read_from_details() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"12s"}]}}"#;
        let err = GeminiProvider::error_from_body(429, body);
        assert_eq!(err.code, ErrorCode::ExternalRateLimited);
        assert!(err.message.contains("12 seconds"));
    }

    #[test]
    fn test_plain_429_is_rate_limited() {
        let body = r#"{"error":{"code":429,"message":"Too many requests","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = GeminiProvider::error_from_body(429, body);
        assert_eq!(err.code, ErrorCode::ExternalRateLimited);

        let err = GeminiProvider::error_from_body(429, "slow down");
        assert_eq!(err.code, ErrorCode::ExternalRateLimited);
    }

    #[test]
    fn test_invalid_key_detected_from_details() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        let err = GeminiProvider::error_from_body(400, body);
        assert_eq!(err.code, ErrorCode::ExternalAuthFailed);
    }

    #[test]
    fn test_unknown_failure() {
        let err = GeminiProvider::error_from_body(500, "upstream exploded");
        assert_eq!(err.code, ErrorCode::ExternalServiceError);
    }

    #[test]
    fn test_stream_chunk_joins_parts() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hey "},{"text":"you"}]}}]}"#;
        let chunk = GeminiProvider::parse_stream_data(data);
        assert!(matches!(
            chunk,
            Some(Ok(StreamChunk { ref delta, is_final: false, .. })) if delta == "Hey you"
        ));

        let done = r#"{"candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"STOP"}]}"#;
        let chunk = GeminiProvider::parse_stream_data(done);
        assert!(matches!(chunk, Some(Ok(StreamChunk { is_final: true, .. }))));
    }

    #[test]
    fn test_malformed_stream_chunk_skipped() {
        assert!(GeminiProvider::parse_stream_data("{not json").is_none());
    }
}
