// ABOUTME: Credit transaction audit records and transaction type enumeration
// ABOUTME: Every balance change is recorded with before/after balances
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Kind of credit-affecting action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credits bought through the payment collaborator
    Purchase,
    /// Promotional or signup grant
    Bonus,
    /// Consumed by a chat turn
    Usage,
    /// Returned to the user
    Refund,
}

impl TransactionType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Bonus => "bonus",
            Self::Usage => "usage",
            Self::Refund => "refund",
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "bonus" => Ok(Self::Bonus),
            "usage" => Ok(Self::Usage),
            "refund" => Ok(Self::Refund),
            other => Err(AppError::invalid_input(format!(
                "Unknown transaction type: {other}"
            ))),
        }
    }
}

/// Audit trail entry for a single balance change
///
/// `balance_after == balance_before + amount` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    /// Unique transaction ID
    pub id: String,
    /// Account owner
    pub user_id: String,
    /// Kind of change
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Signed change applied to the balance
    pub amount: i64,
    /// Human-readable description
    pub description: String,
    /// Balance before the change
    pub balance_before: i64,
    /// Balance after the change
    pub balance_after: i64,
    /// When the change was committed
    pub timestamp: DateTime<Utc>,
    /// Free-form context (conversation id for usage rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}
