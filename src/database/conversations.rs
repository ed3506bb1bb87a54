// ABOUTME: Conversation ledger mapping (user, persona) pairs to one durable conversation
// ABOUTME: Deterministic key derivation, lazy creation via upsert, and per-turn bookkeeping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::errors::{AppError, AppResult};
use crate::models::ConversationRecord;

/// Separator between the two ids so ("ab", "c") and ("a", "bc") differ
const KEY_SEPARATOR: u8 = 0x1f;

/// Derive the conversation key for a (user, persona) pair
///
/// Pure and deterministic: hex-encoded SHA-256 over
/// `user_id || 0x1f || persona_id`.
#[must_use]
pub fn conversation_key(user_id: &str, persona_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([KEY_SEPARATOR]);
    hasher.update(persona_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Conversation persistence
#[derive(Clone)]
pub struct ConversationLedger {
    pool: SqlitePool,
}

impl ConversationLedger {
    /// Create a new conversation ledger
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up or create the conversation for a pair
    ///
    /// Concurrent callers for the same pair converge on one row: the insert
    /// is a no-op when the key already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn resolve(&self, user_id: &str, persona_id: &str) -> AppResult<ConversationRecord> {
        let key = conversation_key(user_id, persona_id);

        let inserted = sqlx::query(
            r"
            INSERT INTO chat_conversations (id, conversation_key, user_id, persona_id, message_count, is_active, created_at)
            VALUES ($1, $2, $3, $4, 0, 1, $5)
            ON CONFLICT(conversation_key) DO NOTHING
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&key)
        .bind(user_id)
        .bind(persona_id)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        if inserted.rows_affected() > 0 {
            debug!(user.id = %user_id, persona.id = %persona_id, "Conversation created");
        }

        self.find_by_key(&key).await?.ok_or_else(|| {
            AppError::database(format!(
                "Conversation for key {key} vanished after upsert"
            ))
        })
    }

    /// Look up the conversation for a pair without creating it
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn find(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        self.find_by_key(&conversation_key(user_id, persona_id))
            .await
    }

    /// Get a conversation by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get(&self, conversation_id: &str) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, conversation_key, user_id, persona_id, last_message_text,
                   last_message_at, message_count, is_active, created_at
            FROM chat_conversations
            WHERE id = $1
            ",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    /// List a user's active conversations, most recently used first
    ///
    /// Conversations that never completed a turn sort last.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> AppResult<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_key, user_id, persona_id, last_message_text,
                   last_message_at, message_count, is_active, created_at
            FROM chat_conversations
            WHERE user_id = $1 AND is_active = 1
            ORDER BY last_message_at IS NULL, last_message_at DESC, created_at DESC
            LIMIT $2
            ",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        rows.iter().map(row_to_conversation).collect()
    }

    /// Record one completed exchange inside a caller-owned transaction
    ///
    /// Sets the last message preview and time and increments `message_count`
    /// by one.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the conversation does not exist, or a
    /// database error
    pub async fn record_exchange_in(
        conn: &mut SqliteConnection,
        conversation_id: &str,
        last_message_text: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE chat_conversations
            SET last_message_text = $1, last_message_at = $2, message_count = message_count + 1
            WHERE id = $3
            ",
        )
        .bind(last_message_text)
        .bind(format_timestamp(at))
        .bind(conversation_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::database(format!("Failed to update conversation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Conversation {conversation_id}")));
        }
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, conversation_key, user_id, persona_id, last_message_text,
                   last_message_at, message_count, is_active, created_at
            FROM chat_conversations
            WHERE conversation_key = $1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find conversation: {e}")))?;

        row.as_ref().map(row_to_conversation).transpose()
    }
}

fn row_to_conversation(r: &SqliteRow) -> AppResult<ConversationRecord> {
    let last_message_at: Option<String> = r.get("last_message_at");
    let created_at: String = r.get("created_at");

    Ok(ConversationRecord {
        id: r.get("id"),
        conversation_key: r.get("conversation_key"),
        user_id: r.get("user_id"),
        persona_id: r.get("persona_id"),
        last_message_text: r.get("last_message_text"),
        last_message_at: last_message_at.as_deref().map(parse_timestamp).transpose()?,
        message_count: r.get("message_count"),
        is_active: r.get("is_active"),
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_is_deterministic() {
        let a = conversation_key("user-1", "sophie");
        let b = conversation_key("user-1", "sophie");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_conversation_key_separates_fields() {
        assert_ne!(conversation_key("ab", "c"), conversation_key("a", "bc"));
        assert_ne!(conversation_key("u", "p"), conversation_key("p", "u"));
    }
}
