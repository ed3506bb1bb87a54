// ABOUTME: Append-only message log scoped to a conversation
// ABOUTME: Bounded most-recent-N retrieval returned oldest-first for model context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::errors::{AppError, AppResult};
use crate::models::{MessageRecord, MessageRole};

/// A message about to be appended
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    /// Conversation the message belongs to
    pub conversation_id: &'a str,
    /// User side of the conversation
    pub user_id: &'a str,
    /// Persona side of the conversation
    pub persona_id: &'a str,
    /// Author
    pub role: MessageRole,
    /// Text
    pub content: &'a str,
    /// When the message was written
    pub timestamp: DateTime<Utc>,
    /// Credits charged for this message
    pub credits_used: i64,
}

/// Message persistence
///
/// Rows are never updated or deleted. Ordering is by timestamp with the
/// insertion sequence (`rowid`) as tie-breaker, so two messages written in the
/// same microsecond still come back in the order they were appended.
#[derive(Clone)]
pub struct MessageLog {
    pool: SqlitePool,
}

impl MessageLog {
    /// Create a new message log
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message inside a caller-owned transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn append_in(
        conn: &mut SqliteConnection,
        message: &NewMessage<'_>,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r"
            INSERT INTO chat_messages (id, conversation_id, user_id, persona_id, role, content, timestamp, credits_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&id)
        .bind(message.conversation_id)
        .bind(message.user_id)
        .bind(message.persona_id)
        .bind(message.role.as_str())
        .bind(message.content)
        .bind(format_timestamp(message.timestamp))
        .bind(message.credits_used)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::database(format!("Failed to add message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: message.conversation_id.to_owned(),
            user_id: message.user_id.to_owned(),
            persona_id: message.persona_id.to_owned(),
            role: message.role,
            content: message.content.to_owned(),
            timestamp: message.timestamp,
            credits_used: message.credits_used,
        })
    }

    /// The newest `limit` messages of a conversation, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, user_id, persona_id, role, content, timestamp, credits_used
            FROM chat_messages
            WHERE conversation_id = $1
            ORDER BY timestamp DESC, rowid DESC
            LIMIT $2
            ",
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get recent messages: {e}")))?;

        // Reverse to get chronological order
        let mut messages = rows
            .iter()
            .map(row_to_message)
            .collect::<AppResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// A chronological page of messages for display
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn messages(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, user_id, persona_id, role, content, timestamp, credits_used
            FROM chat_messages
            WHERE conversation_id = $1
            ORDER BY timestamp ASC, rowid ASC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        rows.iter().map(row_to_message).collect()
    }

    /// Number of messages in a conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn count(&self, conversation_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM chat_messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count messages: {e}")))?;

        Ok(row.get("count"))
    }
}

fn row_to_message(r: &SqliteRow) -> AppResult<MessageRecord> {
    let role: String = r.get("role");
    let timestamp: String = r.get("timestamp");

    Ok(MessageRecord {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        user_id: r.get("user_id"),
        persona_id: r.get("persona_id"),
        role: role
            .parse()
            .map_err(|_| AppError::database(format!("Corrupt message role '{role}'")))?,
        content: r.get("content"),
        timestamp: parse_timestamp(&timestamp)?,
        credits_used: r.get("credits_used"),
    })
}
