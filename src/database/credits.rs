// ABOUTME: Credit ledger with atomic conditional debit and audited credit grants
// ABOUTME: Every balance change writes a transaction row with before/after balances
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::transactions::SqliteTransactionGuard;
use super::{format_timestamp, parse_timestamp};
use crate::errors::{AppError, AppResult};
use crate::logging::ChatLogger;
use crate::models::{CreditTransaction, TransactionType};

/// Credit balance persistence
///
/// The `user_credits.balance` column is the authoritative value; the
/// `credit_transactions` table is the audit trail. Balances are never
/// read-modify-written from application code: the debit is a single
/// conditional `UPDATE` that re-checks the balance in the same statement.
#[derive(Clone)]
pub struct CreditLedger {
    pool: SqlitePool,
}

impl CreditLedger {
    /// Create a new credit ledger
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current balance; users without an account have zero
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn balance(&self, user_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT balance FROM user_credits WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to read balance: {e}")))?;

        row.as_ref().map_or(Ok(0), balance_column)
    }

    /// Grant credits and record the transaction
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-positive amount or a `usage` type, or
    /// a database error
    pub async fn add_credits(
        &self,
        user_id: &str,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        metadata: Option<Value>,
    ) -> AppResult<CreditTransaction> {
        if amount <= 0 {
            return Err(AppError::invalid_input("Credit amount must be positive"));
        }
        if transaction_type == TransactionType::Usage {
            return Err(AppError::invalid_input(
                "Usage transactions are recorded by debits only",
            ));
        }

        let mut guard = SqliteTransactionGuard::begin(&self.pool).await?;
        let conn = guard.executor()?;
        let now = format_timestamp(Utc::now());

        let row = sqlx::query(
            r"
            INSERT INTO user_credits (user_id, balance, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
            WHERE balance <= 9223372036854775807 - excluded.balance
            RETURNING balance
            ",
        )
        .bind(user_id)
        .bind(amount)
        .bind(&now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::database(format!("Failed to add credits: {e}")))?;

        // The guarded upsert returns nothing when the sum would leave INTEGER range
        let Some(row) = row else {
            guard.rollback().await?;
            return Err(AppError::invalid_input(
                "Credit amount would overflow the account balance",
            )
            .with_user_id(user_id));
        };
        let balance_after = balance_column(&row)?;
        let transaction = record_transaction_in(
            conn,
            user_id,
            transaction_type,
            amount,
            description,
            balance_after - amount,
            metadata,
        )
        .await?;
        guard.commit().await?;

        ChatLogger::log_credit_change(user_id, transaction_type.as_str(), amount, balance_after);
        Ok(transaction)
    }

    /// Debit in its own transaction
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCredits` if the balance is below `cost`, or a
    /// database error
    pub async fn debit(
        &self,
        user_id: &str,
        cost: i64,
        description: &str,
        metadata: Option<Value>,
    ) -> AppResult<CreditTransaction> {
        let mut guard = SqliteTransactionGuard::begin(&self.pool).await?;
        let transaction =
            Self::debit_in(guard.executor()?, user_id, cost, description, metadata).await?;
        guard.commit().await?;
        Ok(transaction)
    }

    /// Atomic check-and-debit inside a caller-owned transaction
    ///
    /// The balance check and the write are one statement, so two concurrent
    /// debits can never both succeed against the same stale balance.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCredits` if the balance is below `cost` at the
    /// moment of the write, `InvalidInput` for a non-positive cost, or a
    /// database error
    pub async fn debit_in(
        conn: &mut SqliteConnection,
        user_id: &str,
        cost: i64,
        description: &str,
        metadata: Option<Value>,
    ) -> AppResult<CreditTransaction> {
        if cost <= 0 {
            return Err(AppError::invalid_input("Debit cost must be positive"));
        }

        let row = sqlx::query(
            r"
            UPDATE user_credits
            SET balance = balance - $1, updated_at = $2
            WHERE user_id = $3 AND balance >= $1
            RETURNING balance
            ",
        )
        .bind(cost)
        .bind(format_timestamp(Utc::now()))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::database(format!("Failed to debit credits: {e}")))?;

        let Some(row) = row else {
            let current = sqlx::query("SELECT balance FROM user_credits WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| AppError::database(format!("Failed to read balance: {e}")))?
                .as_ref()
                .map_or(Ok(0), balance_column)?;
            return Err(AppError::insufficient_credits(current, cost).with_user_id(user_id));
        };

        let balance_after = balance_column(&row)?;
        record_transaction_in(
            conn,
            user_id,
            TransactionType::Usage,
            -cost,
            description,
            balance_after + cost,
            metadata,
        )
        .await
    }

    /// Most recent transactions first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> AppResult<Vec<CreditTransaction>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, type, amount, description, balance_before, balance_after, metadata, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, rowid DESC
            LIMIT $2
            ",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list credit transactions: {e}")))?;

        rows.iter().map(row_to_transaction).collect()
    }
}

fn balance_column(row: &SqliteRow) -> AppResult<i64> {
    row.try_get("balance")
        .map_err(|e| AppError::database(format!("Corrupt balance column: {e}")))
}

async fn record_transaction_in(
    conn: &mut SqliteConnection,
    user_id: &str,
    transaction_type: TransactionType,
    amount: i64,
    description: &str,
    balance_before: i64,
    metadata: Option<Value>,
) -> AppResult<CreditTransaction> {
    let id = Uuid::new_v4().to_string();
    let timestamp = Utc::now();
    let balance_after = balance_before + amount;
    let metadata_json = metadata.as_ref().map(Value::to_string);

    sqlx::query(
        r"
        INSERT INTO credit_transactions (id, user_id, type, amount, description, balance_before, balance_after, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ",
    )
    .bind(&id)
    .bind(user_id)
    .bind(transaction_type.as_str())
    .bind(amount)
    .bind(description)
    .bind(balance_before)
    .bind(balance_after)
    .bind(metadata_json)
    .bind(format_timestamp(timestamp))
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::database(format!("Failed to record credit transaction: {e}")))?;

    Ok(CreditTransaction {
        id,
        user_id: user_id.to_owned(),
        transaction_type,
        amount,
        description: description.to_owned(),
        balance_before,
        balance_after,
        timestamp,
        metadata,
    })
}

fn row_to_transaction(r: &SqliteRow) -> AppResult<CreditTransaction> {
    let kind: String = r.get("type");
    let created_at: String = r.get("created_at");
    let metadata: Option<String> = r.get("metadata");

    Ok(CreditTransaction {
        id: r.get("id"),
        user_id: r.get("user_id"),
        transaction_type: kind
            .parse()
            .map_err(|_| AppError::database(format!("Corrupt transaction type '{kind}'")))?,
        amount: r.get("amount"),
        description: r.get("description"),
        balance_before: r.get("balance_before"),
        balance_after: r.get("balance_after"),
        timestamp: parse_timestamp(&created_at)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}
