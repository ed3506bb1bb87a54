// ABOUTME: Client-side reader for the chat streaming transport
// ABOUTME: Decodes UTF-8 incrementally, splits SSE frames and reassembles the reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Stream Client
//!
//! [`read_chat_stream`] consumes the byte stream of `POST /api/chat/send`,
//! hands every text fragment to a callback together with the text so far, and
//! resolves with the full reply.
//!
//! A stream that ends without a `done` frame is not an error: whatever was
//! accumulated is returned as a best-effort reply.

use std::mem;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chat::ChatFrame;
use crate::errors::{AppError, AppResult, ErrorCode};

/// Result of one chat turn as seen by the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Whether the turn finished (explicit `done`, or end of stream)
    pub success: bool,
    /// Full reply text
    pub response: String,
    /// Conversation id, once the server sent it
    pub conversation_id: Option<String>,
    /// Credits debited; absent when the stream ended without `done`
    pub credits_used: Option<i64>,
}

/// Incremental decoder from raw bytes to [`ChatFrame`]s
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    /// Bytes not yet forming complete UTF-8
    pending_bytes: Vec<u8>,
    /// Decoded text not yet terminated by a blank line
    text: String,
}

impl ChatStreamDecoder {
    /// Create an empty decoder
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending_bytes: Vec::new(),
            text: String::new(),
        }
    }

    /// Feed bytes and return every frame they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatFrame> {
        self.pending_bytes.extend_from_slice(bytes);
        self.decode_utf8();

        let mut frames = Vec::new();
        while let Some((end, delimiter_len)) = find_frame_end(&self.text) {
            let raw: String = self.text.drain(..end + delimiter_len).collect();
            if let Some(frame) = parse_frame(&raw[..end]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parse whatever is left once the stream ended
    pub fn finish(&mut self) -> Vec<ChatFrame> {
        if !self.pending_bytes.is_empty() {
            let rest = mem::take(&mut self.pending_bytes);
            self.text.push_str(&String::from_utf8_lossy(&rest));
        }
        let raw = mem::take(&mut self.text);
        parse_frame(&raw).into_iter().collect()
    }

    /// Move the longest valid UTF-8 prefix into `text`
    ///
    /// An incomplete trailing sequence stays buffered; a genuinely invalid
    /// sequence is replaced with U+FFFD so it cannot stall the decoder.
    fn decode_utf8(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    let valid: Vec<u8> = self.pending_bytes.drain(..valid_up_to).collect();
                    self.text.push_str(&String::from_utf8_lossy(&valid));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes
                        None => return,
                        Some(bad) => {
                            self.pending_bytes.drain(..bad);
                            self.text.push(char::REPLACEMENT_CHARACTER);
                        }
                    }
                }
            }
        }
    }
}

/// Position and length of the first blank-line frame delimiter
fn find_frame_end(text: &str) -> Option<(usize, usize)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parse one frame; comments, non-data fields and malformed JSON yield `None`
fn parse_frame(raw: &str) -> Option<ChatFrame> {
    let data = raw
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect::<Vec<_>>()
        .join("\n");

    if data.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatFrame>(&data) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Skipping malformed chat frame");
            None
        }
    }
}

/// Read a chat event stream to completion
///
/// `on_chunk(chunk, full_text_so_far)` is called for every text fragment in
/// arrival order.
///
/// # Errors
///
/// Returns the transmitted error for an `error` frame, or
/// `ExternalServiceError` if reading the byte stream fails
pub async fn read_chat_stream<S, E, F>(byte_stream: S, mut on_chunk: F) -> AppResult<ChatReply>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(&str, &str),
{
    let mut decoder = ChatStreamDecoder::new();
    let mut reply = ChatReply::default();
    let mut byte_stream = std::pin::pin!(byte_stream);

    while let Some(item) = byte_stream.next().await {
        let bytes =
            item.map_err(|e| AppError::external_service("chat stream", format!("Read failed: {e}")))?;
        for frame in decoder.feed(&bytes) {
            if apply_frame(&mut reply, frame, &mut on_chunk)? {
                return Ok(reply);
            }
        }
    }

    for frame in decoder.finish() {
        if apply_frame(&mut reply, frame, &mut on_chunk)? {
            return Ok(reply);
        }
    }

    debug!("Chat stream ended without a done frame");
    reply.success = true;
    Ok(reply)
}

/// Fold one frame into the reply; returns `true` on the terminal frame
fn apply_frame<F>(reply: &mut ChatReply, frame: ChatFrame, on_chunk: &mut F) -> AppResult<bool>
where
    F: FnMut(&str, &str),
{
    if let Some(message) = frame.error {
        let code = frame.code.unwrap_or(ErrorCode::ExternalServiceError);
        return Err(AppError::new(code, message));
    }
    if let Some(id) = frame.conversation_id {
        reply.conversation_id = Some(id);
    }
    if let Some(chunk) = frame.chunk {
        reply.response.push_str(&chunk);
        on_chunk(&chunk, &reply.response);
    }
    if frame.done == Some(true) {
        reply.success = true;
        reply.credits_used = frame.credits_used;
        if let Some(full) = frame.response {
            if full != reply.response {
                debug!("Server response differs from streamed chunks; using server copy");
                reply.response = full;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    user_id: &'a str,
    bot_profile_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    stream: bool,
}

/// `reqwest`-based caller for the chat endpoint
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    /// Create a client for a server at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Send a message and stream the reply through `on_chunk`
    ///
    /// # Errors
    ///
    /// Returns the server's error (with its code and text) for non-2xx
    /// answers or `error` frames, or `ExternalServiceError` for transport
    /// failures
    pub async fn send_streaming<F>(
        &self,
        user_id: &str,
        persona_id: &str,
        message: &str,
        conversation_id: Option<&str>,
        on_chunk: F,
    ) -> AppResult<ChatReply>
    where
        F: FnMut(&str, &str),
    {
        let response = self
            .post(user_id, persona_id, message, conversation_id, true)
            .await?;
        read_chat_stream(response.bytes_stream(), on_chunk).await
    }

    /// Send a message and wait for the whole reply
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_streaming`]
    pub async fn send(
        &self,
        user_id: &str,
        persona_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> AppResult<ChatReply> {
        let response = self
            .post(user_id, persona_id, message, conversation_id, false)
            .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::external_service("chat server", format!("Bad response: {e}")))?;

        Ok(ChatReply {
            success: body["success"].as_bool().unwrap_or(false),
            response: body["response"].as_str().unwrap_or_default().to_owned(),
            conversation_id: body["conversationId"].as_str().map(ToOwned::to_owned),
            credits_used: body["creditsUsed"].as_i64(),
        })
    }

    async fn post(
        &self,
        user_id: &str,
        persona_id: &str,
        message: &str,
        conversation_id: Option<&str>,
        stream: bool,
    ) -> AppResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat/send", self.base_url))
            .json(&SendBody {
                user_id,
                bot_profile_id: persona_id,
                message,
                conversation_id,
                stream,
            })
            .send()
            .await
            .map_err(|e| AppError::external_service("chat server", format!("Request failed: {e}")))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let code = serde_json::from_value::<ErrorCode>(body["code"].clone())
            .unwrap_or(ErrorCode::ExternalServiceError);
        let message = body["response"]
            .as_str()
            .map_or_else(|| format!("Chat server answered {status}"), ToOwned::to_owned);
        Err(AppError::new(code, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_holds_split_multibyte_character() {
        let mut decoder = ChatStreamDecoder::new();
        let frame = "data: {\"chunk\":\"ol\u{e1} \u{1f60d}\"}\n\n".as_bytes();
        let cut = frame.len() - 6; // inside the emoji

        assert!(decoder.feed(&frame[..cut]).is_empty());
        let frames = decoder.feed(&frame[cut..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].chunk.as_deref(), Some("ol\u{e1} \u{1f60d}"));
    }

    #[test]
    fn test_decoder_accepts_crlf_and_comments() {
        let mut decoder = ChatStreamDecoder::new();
        let frames = decoder.feed(b":\r\n\r\ndata:{\"chunk\":\"a\"}\r\n\r\ndata: {\"done\":true}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].chunk.as_deref(), Some("a"));
        assert_eq!(frames[1].done, Some(true));
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut decoder = ChatStreamDecoder::new();
        let frames = decoder.feed(b"data: {oops\n\ndata: {\"chunk\":\"b\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].chunk.as_deref(), Some("b"));
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = ChatStreamDecoder::new();
        assert!(decoder.feed(b"data: {\"chunk\":\"tail\"}").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames[0].chunk.as_deref(), Some("tail"));
    }
}
