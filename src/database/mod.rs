// ABOUTME: SQLite connection management and schema migrations for the chat server
// ABOUTME: Exposes persona, conversation, message, and credit stores over one pool
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Database Management
//!
//! The document store behind the chat pipeline. Each store is a thin handle
//! over the shared pool:
//!
//! - [`PersonaStore`]: read-mostly persona descriptors
//! - [`ConversationLedger`]: one conversation per (user, persona)
//! - [`MessageLog`]: append-only turns
//! - [`CreditLedger`]: balances plus the transaction audit trail
//!
//! Operations that must take part in a caller-owned transaction have an `_in`
//! variant taking `&mut SqliteConnection`.

mod conversations;
mod credits;
mod messages;
mod personas;
/// Transaction guard and retry helpers
pub mod transactions;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub use conversations::{conversation_key, ConversationLedger};
pub use credits::CreditLedger;
pub use messages::{MessageLog, NewMessage};
pub use personas::PersonaStore;
pub use transactions::{retry_transaction, SqliteTransactionGuard, TransactionGuard};

use crate::config::DatabaseUrl;
use crate::errors::{AppError, AppResult};

/// Database manager owning the connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and run migrations
    ///
    /// In-memory databases use exactly one long-lived connection, since every
    /// `SQLite` connection to `:memory:` opens its own private database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails
    pub async fn new(url: &DatabaseUrl) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&url.to_connection_string())
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL '{url}': {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if url.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            if let DatabaseUrl::SQLite { path } = url {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::config(format!(
                            "Failed to create database directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
            }
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await
        }
        .map_err(|e| AppError::database(format!("Failed to connect to {url}: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        info!(database = %url, "Database ready");
        Ok(db)
    }

    /// Get a reference to the pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persona store handle
    #[must_use]
    pub fn personas(&self) -> PersonaStore {
        PersonaStore::new(self.pool.clone())
    }

    /// Conversation ledger handle
    #[must_use]
    pub fn conversations(&self) -> ConversationLedger {
        ConversationLedger::new(self.pool.clone())
    }

    /// Message log handle
    #[must_use]
    pub fn messages(&self) -> MessageLog {
        MessageLog::new(self.pool.clone())
    }

    /// Credit ledger handle
    #[must_use]
    pub fn credits(&self) -> CreditLedger {
        CreditLedger::new(self.pool.clone())
    }

    /// Round-trip a trivial query
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Database ping failed: {e}")))?;
        Ok(())
    }

    /// Run idempotent schema migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_personas().await?;
        self.migrate_credits().await?;
        self.migrate_chat().await?;
        debug!("Database migrations applied");
        Ok(())
    }

    async fn migrate_personas(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                age INTEGER NOT NULL DEFAULT 0,
                gender TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                bio TEXT NOT NULL DEFAULT '',
                personality_traits TEXT NOT NULL DEFAULT '[]',
                interests TEXT NOT NULL DEFAULT '[]',
                chat_style TEXT NOT NULL DEFAULT 'playful',
                field_of_work TEXT,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create personas table: {e}")))?;

        Ok(())
    }

    async fn migrate_credits(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_credits (
                user_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create user_credits table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS credit_transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                type TEXT NOT NULL,
                amount INTEGER NOT NULL,
                description TEXT NOT NULL,
                balance_before INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL,
                CHECK (balance_after = balance_before + amount)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to create credit_transactions table: {e}"))
        })?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_credit_transactions_user ON credit_transactions(user_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create credit index: {e}")))?;

        Ok(())
    }

    async fn migrate_chat(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_conversations (
                id TEXT PRIMARY KEY,
                conversation_key TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                last_message_text TEXT,
                last_message_at TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to create chat_conversations table: {e}"))
        })?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES chat_conversations(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'bot')),
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                credits_used INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_conversations_user ON chat_conversations(user_id, last_message_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation ON chat_messages(conversation_id, timestamp)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create message index: {e}")))?;

        Ok(())
    }
}

/// Render a timestamp in the fixed-width form stored in every table
///
/// Fixed microsecond precision keeps lexical order equal to time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub(crate) fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Corrupt timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format_is_sortable() {
        let earlier = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_timestamp(&format_timestamp(later)).unwrap(), later);
    }

    #[tokio::test]
    async fn test_memory_database_migrates_twice() {
        let db = Database::new(&DatabaseUrl::Memory).await.unwrap();
        db.migrate().await.unwrap();
        db.ping().await.unwrap();
    }
}
