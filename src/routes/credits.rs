// ABOUTME: Credit route handlers for balance reads, history and grants
// ABOUTME: Grants are called by the external payment collaborator after a purchase
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{CreditTransaction, TransactionType};
use crate::resources::ServerResources;

/// Balance of one user
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// User
    pub user_id: String,
    /// Current balance
    pub balance: i64,
}

/// Query for the transaction history
#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    /// Maximum number to return
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_limit() -> i64 {
    50
}

/// Transaction history
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionsResponse {
    /// Most recent first
    pub transactions: Vec<CreditTransaction>,
}

/// Body of a credit grant
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Credits to add, positive
    pub amount: i64,
    /// `purchase`, `bonus` or `refund`
    #[serde(rename = "type", default = "default_grant_type")]
    pub transaction_type: TransactionType,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque metadata, e.g. a payment reference
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

const fn default_grant_type() -> TransactionType {
    TransactionType::Purchase
}

/// Result of a credit grant
#[derive(Debug, Serialize, Deserialize)]
pub struct GrantCreditsResponse {
    /// Recorded transaction
    pub transaction: CreditTransaction,
    /// Balance after the grant
    pub balance: i64,
}

/// Credit routes handler
pub struct CreditRoutes;

impl CreditRoutes {
    /// Create all credit routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/api/credits/:user_id",
                get(Self::get_balance).post(Self::grant_credits),
            )
            .route(
                "/api/credits/:user_id/transactions",
                get(Self::list_transactions),
            )
            .with_state(resources)
    }

    async fn get_balance(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
    ) -> Result<Json<BalanceResponse>, AppError> {
        let balance = resources.database.credits().balance(&user_id).await?;
        Ok(Json(BalanceResponse { user_id, balance }))
    }

    async fn list_transactions(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
        Query(query): Query<TransactionsQuery>,
    ) -> Result<Json<TransactionsResponse>, AppError> {
        let transactions = resources
            .database
            .credits()
            .transactions(&user_id, query.limit.clamp(1, 200))
            .await?;
        Ok(Json(TransactionsResponse { transactions }))
    }

    async fn grant_credits(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
        Json(body): Json<GrantCreditsRequest>,
    ) -> Result<(StatusCode, Json<GrantCreditsResponse>), AppError> {
        let description = body
            .description
            .unwrap_or_else(|| format!("{} of {} credits", body.transaction_type, body.amount));
        let transaction = resources
            .database
            .credits()
            .add_credits(
                &user_id,
                body.amount,
                body.transaction_type,
                &description,
                body.metadata,
            )
            .await?;
        let balance = transaction.balance_after;
        Ok((
            StatusCode::CREATED,
            Json(GrantCreditsResponse {
                transaction,
                balance,
            }),
        ))
    }
}
