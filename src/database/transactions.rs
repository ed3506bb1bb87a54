// ABOUTME: Transaction management with an RAII guard and lock-contention retry
// ABOUTME: Finalization of a chat turn runs through these so it commits whole or not at all
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Transaction helpers
//!
//! - [`TransactionGuard`]: wraps an sqlx transaction and rolls it back when
//!   dropped without an explicit [`TransactionGuard::commit`].
//! - [`retry_transaction`]: re-runs a whole unit of work when `SQLite`
//!   reports lock contention, with exponential backoff.
//!
//! ```text
//! retry_transaction(|| async {
//!     let mut guard = SqliteTransactionGuard::begin(&pool).await?;
//!     MessageLog::append_in(guard.executor()?, &user_turn).await?;
//!     CreditLedger::debit_in(guard.executor()?, user_id, 1, "Chat message", None).await?;
//!     guard.commit().await
//! }, 3).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use sqlx::{Database, Pool, Transaction};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::errors::{AppError, AppResult, ErrorCode};

/// Run `f` until it succeeds, fails with a non-retryable error, or has been
/// attempted `max_attempts` times
///
/// Only database errors that indicate lock contention or a busy timeout are
/// retried. Backoff doubles from 20ms.
///
/// # Errors
///
/// Returns the last error produced by `f`
pub async fn retry_transaction<F, Fut, T>(mut f: F, max_attempts: u32) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempts = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if !is_retryable_error(&e) {
                    return Err(e);
                }
                if attempts >= max_attempts {
                    error!(
                        attempts,
                        error = %e,
                        "Transaction still contended after max attempts"
                    );
                    return Err(e);
                }

                let backoff_ms = 10 * (1_u64 << attempts);
                warn!(
                    attempt = attempts,
                    max_attempts,
                    backoff_ms,
                    error = %e,
                    "Transaction hit lock contention, retrying after backoff"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Lock contention and busy timeouts are transient; everything else is not
fn is_retryable_error(error: &AppError) -> bool {
    if error.code != ErrorCode::DatabaseError {
        return false;
    }

    let message = error.message.to_lowercase();
    if message.contains("constraint") {
        return false;
    }
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("busy")
        || message.contains("timed out")
        || message.contains("timeout")
}

/// RAII guard for database transactions ensuring rollback on drop
pub struct TransactionGuard<'c, DB: Database> {
    transaction: Option<Transaction<'c, DB>>,
}

impl<DB: Database> TransactionGuard<'static, DB> {
    /// Begin a transaction on a pooled connection
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be acquired or `BEGIN` fails
    pub async fn begin(pool: &Pool<DB>) -> AppResult<Self> {
        let transaction = pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;
        Ok(Self::new(transaction))
    }
}

impl<'c, DB: Database> TransactionGuard<'c, DB> {
    /// Wrap an existing sqlx transaction
    #[must_use]
    pub fn new(transaction: Transaction<'c, DB>) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    /// Commit the transaction and consume the guard
    ///
    /// # Errors
    ///
    /// Returns an error if the guard was already consumed or `COMMIT` fails
    pub async fn commit(mut self) -> AppResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| AppError::internal("Transaction already consumed - cannot commit"))?;
        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Transaction commit failed: {e}")))?;
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back explicitly and consume the guard
    ///
    /// # Errors
    ///
    /// Returns an error if the guard was already consumed or `ROLLBACK` fails
    pub async fn rollback(mut self) -> AppResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| AppError::internal("Transaction already consumed - cannot rollback"))?;
        tx.rollback()
            .await
            .map_err(|e| AppError::database(format!("Transaction rollback failed: {e}")))?;
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Connection to run statements inside the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the guard was already committed or rolled back
    pub fn executor(&mut self) -> AppResult<&mut <DB as Database>::Connection> {
        self.transaction.as_deref_mut().ok_or_else(|| {
            AppError::internal("Transaction already consumed - guard used after commit/rollback")
        })
    }
}

impl<DB: Database> Drop for TransactionGuard<'_, DB> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            debug!("Transaction dropped without commit - rolling back");
        }
    }
}

/// `SQLite` transaction guard
pub type SqliteTransactionGuard<'c> = TransactionGuard<'c, sqlx::Sqlite>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&AppError::database(
            "error returned from database: (code: 5) database is locked"
        )));
        assert!(!is_retryable_error(&AppError::database(
            "UNIQUE constraint failed: chat_messages.id"
        )));
        assert!(!is_retryable_error(&AppError::insufficient_credits(0, 1)));
        assert!(!is_retryable_error(&AppError::rate_limited("timeout")));
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transaction(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::database("database is locked"))
                } else {
                    Ok(7)
                }
            },
            3,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_business_errors() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = retry_transaction(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::insufficient_credits(0, 1))
            },
            3,
        )
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::InsufficientCredits);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
