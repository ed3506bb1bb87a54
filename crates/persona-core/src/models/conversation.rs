// ABOUTME: Chat conversation and message record types for database persistence
// ABOUTME: One conversation per (user, persona) pair with append-only message turns
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Author of a persisted chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human user
    User,
    /// Synthetic persona
    Bot,
}

impl MessageRole {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }
}

impl Display for MessageRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "bot" => Ok(Self::Bot),
            other => Err(AppError::invalid_input(format!(
                "Unknown message role: {other}"
            ))),
        }
    }
}

/// Database representation of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// Deterministic key derived from (user, persona); unique
    pub conversation_key: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Persona the user is talking to
    pub persona_id: String,
    /// Text of the latest bot reply, if any turn has completed
    pub last_message_text: Option<String>,
    /// When the latest turn completed
    pub last_message_at: Option<DateTime<Utc>>,
    /// Completed exchanges (one user message plus one reply each)
    pub message_count: i64,
    /// Whether the conversation is shown in the user's list
    pub is_active: bool,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
}

/// Database representation of a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation ID this message belongs to
    pub conversation_id: String,
    /// User side of the conversation
    pub user_id: String,
    /// Persona side of the conversation
    pub persona_id: String,
    /// Who wrote the message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was written
    pub timestamp: DateTime<Utc>,
    /// Credits charged for this message
    pub credits_used: i64,
}
