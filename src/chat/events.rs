// ABOUTME: Chat turn events and their JSON wire frames for the streaming transport
// ABOUTME: One frame type shared by the server encoder and the client decoder
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, ErrorCode};

/// An event produced while a chat turn runs
///
/// A turn always emits `ConversationId` first, then any number of `Chunk`s,
/// then exactly one of `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The conversation the turn belongs to
    ConversationId(String),
    /// Incremental reply text
    Chunk(String),
    /// The turn was persisted and billed
    Done {
        /// Credits debited for the turn
        credits_used: i64,
        /// Conversation the turn was recorded in
        conversation_id: String,
        /// Full reply text
        response: String,
    },
    /// The turn failed and nothing was persisted
    Error {
        /// Human-readable message
        message: String,
        /// Machine-readable error kind
        code: ErrorCode,
    },
}

impl ChatEvent {
    /// Error event carrying the user-facing text for `error`
    #[must_use]
    pub fn from_error(error: &AppError) -> Self {
        Self::Error {
            message: error.user_message(),
            code: error.code,
        }
    }

    /// Whether no further events follow this one
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Serialize as the JSON payload of one `data:` frame
    #[must_use]
    pub fn to_frame_json(&self) -> String {
        serde_json::to_string(&ChatFrame::from(self)).unwrap_or_else(|_| {
            r#"{"error":"Failed to encode event","code":"SERIALIZATION_ERROR"}"#.to_owned()
        })
    }
}

/// JSON shape of a single streamed frame
///
/// Every field is optional so that the decoder tolerates frames from older or
/// newer servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    /// Incremental reply text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    /// Conversation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Credits debited, present on the terminal frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<i64>,
    /// Terminal marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    /// Full reply, present on the terminal frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind accompanying `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl From<&ChatEvent> for ChatFrame {
    fn from(event: &ChatEvent) -> Self {
        match event {
            ChatEvent::ConversationId(id) => Self {
                conversation_id: Some(id.clone()),
                ..Self::default()
            },
            ChatEvent::Chunk(text) => Self {
                chunk: Some(text.clone()),
                ..Self::default()
            },
            ChatEvent::Done {
                credits_used,
                conversation_id,
                response,
            } => Self {
                done: Some(true),
                credits_used: Some(*credits_used),
                conversation_id: Some(conversation_id.clone()),
                response: Some(response.clone()),
                ..Self::default()
            },
            ChatEvent::Error { message, code } => Self {
                error: Some(message.clone()),
                code: Some(*code),
                ..Self::default()
            },
        }
    }
}
