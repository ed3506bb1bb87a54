// ABOUTME: Shared SSE (Server-Sent Events) line-buffering parser for LLM streaming responses
// ABOUTME: Handles partial lines and split UTF-8 across TCP boundaries, plus initial-request retry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # SSE Stream Parser
//!
//! A shared line-buffering parser for provider streaming responses:
//!
//! 1. **Multiple events per TCP chunk**: every complete `data:` line in a
//!    chunk is emitted, not just the first.
//! 2. **Partial lines across TCP boundaries**: bytes are buffered until a
//!    newline arrives, so JSON split over two reads is parsed once, whole.
//!    Buffering happens before UTF-8 decoding, so a multi-byte character cut
//!    in half by the network is never mangled.
//!
//! Each provider supplies a `parse_data` closure that turns one JSON payload
//! into a [`StreamChunk`]. Returning `None` skips the payload (metadata-only
//! events, or unparseable chunks the provider already logged).

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{future, Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use tokio::time::sleep;
use tracing::warn;

use super::{ChatStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination signal (OpenAI-compatible convention)
    Done,
}

/// Line-buffering SSE parser
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Bytes not yet terminated by a newline
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes, returning every SSE event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever remains once the byte stream has ended
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&remaining))
            .into_iter()
            .collect()
    }
}

/// Parse one SSE line; non-data fields and comments are ignored
fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent::Data(data.to_owned()))
}

/// Create a properly-buffered chat stream from a raw byte stream
///
/// Empty deltas are filtered out unless they carry the final marker.
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_data: F,
    provider_name: &'static str,
) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
    };

    let stream = unfold(
        (
            Box::pin(byte_stream)
                as Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
            state,
            parse_data,
        ),
        move |(mut byte_stream, mut state, parse_data)| async move {
            loop {
                // Drain pending events first (multiple SSE events per TCP chunk)
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_data)));
                }

                if state.stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let events = state.parser.feed(&bytes);
                        state.enqueue(events, &parse_data);
                    }
                    Some(Err(e)) => {
                        state.stream_ended = true;
                        return Some((
                            Err(AppError::external_service(
                                provider_name,
                                format!("Stream read error: {e}"),
                            )),
                            (byte_stream, state, parse_data),
                        ));
                    }
                    None => {
                        state.stream_ended = true;
                        let events = state.parser.flush();
                        state.enqueue(events, &parse_data);
                    }
                }
            }
        },
    );

    let filtered = stream.filter(|result| {
        future::ready(
            result
                .as_ref()
                .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final),
        )
    });

    Box::pin(filtered)
}

/// Internal state for the SSE stream unfold
struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, AppError>>,
    stream_ended: bool,
}

impl SseStreamState {
    fn enqueue<F>(&mut self, events: Vec<SseEvent>, parse_data: &F)
    where
        F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
    {
        for event in events {
            match event {
                SseEvent::Data(json_str) => {
                    if let Some(result) = parse_data(&json_str) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => self.pending.push_back(Ok(StreamChunk {
                    delta: String::new(),
                    is_final: true,
                    finish_reason: Some("stop".to_owned()),
                })),
            }
        }
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry policy for the initial provider HTTP request
///
/// Only the request that opens a completion is retried. Once bytes flow the
/// stream is never restarted, since the client may already have shown them.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay cap for exponential backoff (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RetryConfig {
    /// Default retry config: 2 retries, 500ms initial, 5s max
    #[must_use]
    pub const fn default_config() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }

    /// No retries at all
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Exponential backoff with a little jitter
    ///
    /// `delay = min(initial_ms * 2^attempt, max_ms) + jitter(0..100ms)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self
            .initial_delay_ms
            .saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped_delay = base_delay.min(self.max_delay_ms);
        if capped_delay == 0 {
            return Duration::ZERO;
        }
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_millis()))
            % 100;
        Duration::from_millis(capped_delay + jitter)
    }
}

/// Check if an HTTP status is worth retrying
///
/// 502 and 503 are transient upstream trouble. 429 is deliberately excluded:
/// throttling is surfaced to the user as a rate-limit error instead of being
/// hidden behind extra latency.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503)
}

/// Check if a request error is retryable (connection/timeout errors)
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Send a request, retrying transient failures per `retry`
///
/// `build` is called once per attempt because a `RequestBuilder` cannot be
/// reused. Non-success statuses that are not retryable are returned as-is for
/// the provider to classify.
///
/// # Errors
///
/// Returns `ExternalServiceError` if the request cannot be sent after all
/// attempts
pub async fn send_with_retry<B>(
    build: B,
    retry: &RetryConfig,
    provider_name: &'static str,
) -> Result<Response, AppError>
where
    B: Fn() -> RequestBuilder,
{
    send_with_retry_using(|| build().send(), retry, provider_name).await
}

async fn send_with_retry_using<F, Fut>(
    send: F,
    retry: &RetryConfig,
    provider_name: &'static str,
) -> Result<Response, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        match send().await {
            Ok(response)
                if is_retryable_status(response.status().as_u16())
                    && attempt < retry.max_retries =>
            {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    provider = provider_name,
                    status = %response.status(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Provider returned transient status, retrying"
                );
                sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(e) if is_retryable_request_error(&e) && attempt < retry.max_retries => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    provider = provider_name,
                    error = %e,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Provider request failed, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                return Err(AppError::external_service(
                    provider_name,
                    format!("Failed to connect: {e}"),
                ));
            }
        }
        attempt += 1;
    }
}
