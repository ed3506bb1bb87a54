// ABOUTME: Unified error handling with standard error codes and HTTP status mapping
// ABOUTME: Distinguishes credit, provider, and persistence failures for the chat pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Unified Error Handling System
//!
//! This module provides a centralized error handling system for the persona chat
//! server. It defines standard error types, error codes, and HTTP response
//! formatting so that every layer (stores, providers, orchestrator, routes)
//! reports failures the same way.
//!
//! The provider failure taxonomy is encoded directly in [`ErrorCode`]:
//!
//! | Kind                 | Code                      | HTTP |
//! |----------------------|---------------------------|------|
//! | insufficient credits | `InsufficientCredits`     | 402  |
//! | rate limited         | `ExternalRateLimited`     | 429  |
//! | quota exceeded       | `ExternalQuotaExceeded`   | 503  |
//! | bad API key          | `ExternalAuthFailed`      | 502  |
//! | unknown upstream     | `ExternalServiceError`    | 502  |
//! | persistence          | `DatabaseError`           | 500  |

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Validation (3000-3999)
    /// Request payload failed validation
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,
    /// A required field is absent
    #[serde(rename = "MISSING_REQUIRED_FIELD")]
    MissingRequiredField = 3001,

    // Credits (3500-3599)
    /// User balance is below the per-message cost
    #[serde(rename = "INSUFFICIENT_CREDITS")]
    InsufficientCredits = 3500,

    // Resource Management (4000-4999)
    /// Persona, conversation, or account does not exist
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 4000,

    // External Services (5000-5999)
    /// Catch-all upstream provider failure
    #[serde(rename = "EXTERNAL_SERVICE_ERROR")]
    ExternalServiceError = 5000,
    /// Upstream rejected our API key
    #[serde(rename = "EXTERNAL_AUTH_FAILED")]
    ExternalAuthFailed = 5002,
    /// Upstream throttled the request (HTTP 429 equivalent)
    #[serde(rename = "EXTERNAL_RATE_LIMITED")]
    ExternalRateLimited = 5003,
    /// Upstream account quota is exhausted
    #[serde(rename = "EXTERNAL_QUOTA_EXCEEDED")]
    ExternalQuotaExceeded = 5004,

    // Configuration (6000-6999)
    /// Configuration could not be applied
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,
    /// Required configuration is absent
    #[serde(rename = "CONFIG_MISSING")]
    ConfigMissing = 6001,

    // Internal Errors (9000-9999)
    /// Unexpected internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    /// Document store read or write failed
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// JSON encoding or decoding failed
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9003,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => 400,
            Self::InsufficientCredits => 402,
            Self::ResourceNotFound => 404,
            Self::ExternalRateLimited => 429,
            Self::ExternalServiceError | Self::ExternalAuthFailed => 502,
            Self::ExternalQuotaExceeded => 503,
            Self::ConfigError
            | Self::ConfigMissing
            | Self::InternalError
            | Self::DatabaseError
            | Self::SerializationError => 500,
        }
    }

    /// Get a short description of this error class
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidInput => "The provided input is invalid",
            Self::MissingRequiredField => "A required field is missing from the request",
            Self::InsufficientCredits => "Insufficient credits",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::ExternalAuthFailed => "Authentication with external service failed",
            Self::ExternalRateLimited => "External service rate limit exceeded",
            Self::ExternalQuotaExceeded => "External service quota exceeded",
            Self::ConfigError => "Configuration error encountered",
            Self::ConfigMissing => "Required configuration is missing",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::SerializationError => "Data serialization/deserialization failed",
        }
    }

    /// Human-readable text shown to chat users for this error class
    ///
    /// Provider and persistence details never reach the end user; they see a
    /// short, in-product explanation instead.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => {
                "That message couldn't be sent. Please check it and try again."
            }
            Self::InsufficientCredits => {
                "You're out of credits. Top up your balance to keep chatting."
            }
            Self::ResourceNotFound => "This profile is no longer available.",
            Self::ExternalRateLimited => {
                "Too many messages right now. Please wait a moment and try again."
            }
            Self::ExternalQuotaExceeded => {
                "Chat is temporarily unavailable. Please try again later."
            }
            Self::ExternalAuthFailed
            | Self::ConfigError
            | Self::ConfigMissing => "Chat is currently unavailable due to a configuration issue.",
            Self::ExternalServiceError => {
                "Sorry, I couldn't come up with a reply. Please try again."
            }
            Self::InternalError | Self::DatabaseError | Self::SerializationError => {
                "Something went wrong while saving your message. You have not been charged."
            }
        }
    }

    /// Whether the caller may retry the same request after a backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalRateLimited | Self::ExternalServiceError)
    }

    /// Whether this code originates from an upstream completion provider
    #[must_use]
    pub const fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::ExternalServiceError
                | Self::ExternalAuthFailed
                | Self::ExternalRateLimited
                | Self::ExternalQuotaExceeded
        )
    }
}

/// Additional context that can be attached to errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Request ID for tracing
    pub request_id: Option<String>,
    /// User ID if available
    pub user_id: Option<String>,
    /// Resource ID if applicable
    pub resource_id: Option<String>,
    /// Additional key-value context
    pub details: serde_json::Value,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            request_id: None,
            user_id: None,
            resource_id: None,
            details: serde_json::Value::Null,
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message (operator facing)
    pub message: String,
    /// Additional context
    pub context: ErrorContext,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add a request ID to the error context
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.context.request_id = Some(request_id.into());
        self
    }

    /// Add a user ID to the error context
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    /// Add a resource ID to the error context
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.context.resource_id = Some(resource_id.into());
        self
    }

    /// Add details to the error context
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.context.details = details;
        self
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Text suitable for showing to the chat user
    ///
    /// Rate-limit errors keep their own message because providers often tell
    /// us exactly how long to wait.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.code {
            ErrorCode::ExternalRateLimited | ErrorCode::InvalidInput
                if !self.message.is_empty() =>
            {
                self.message.clone()
            }
            code => code.user_message().to_owned(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error payload
    pub error: ErrorResponseDetails,
}

/// Body of an [`ErrorResponse`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Request ID for correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Additional structured details
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message: error.message,
                request_id: error.context.request_id,
                details: error.context.details,
            },
        }
    }
}

/// Convenience functions for creating common errors
impl AppError {
    /// Resource not found
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Invalid input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Balance below the cost of the requested operation
    #[must_use]
    pub fn insufficient_credits(balance: i64, required: i64) -> Self {
        Self::new(
            ErrorCode::InsufficientCredits,
            format!("Balance of {balance} credits is below the required {required}"),
        )
        .with_details(serde_json::json!({
            "balance": balance,
            "required": required,
        }))
    }

    /// Internal server error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Unknown upstream service failure
    #[must_use]
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{}: {}", service.into(), message.into()),
        )
    }

    /// Upstream rate limiting
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalRateLimited, message)
    }

    /// Upstream quota exhaustion
    #[must_use]
    pub fn quota_exceeded(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalQuotaExceeded,
            format!("{}: {}", service.into(), message.into()),
        )
    }

    /// Upstream rejected credentials
    #[must_use]
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalAuthFailed, message)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::SerializationError,
            format!("JSON processing failed: {error}"),
        )
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(error.to_string()).with_source(error)
    }
}

#[cfg(feature = "provider-errors")]
impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        Self::external_service("HTTP", error.to_string()).with_source(error)
    }
}

#[cfg(feature = "http-response")]
mod http_response {
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use http::StatusCode;
    use tracing::{error, info, warn};

    use super::{AppError, ErrorCode, ErrorResponse};

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

            match self.code {
                ErrorCode::InsufficientCredits
                | ErrorCode::InvalidInput
                | ErrorCode::MissingRequiredField
                | ErrorCode::ResourceNotFound => {
                    info!(code = ?self.code, "Request rejected: {}", self.message);
                }
                code if code.is_provider_failure() => {
                    warn!(code = ?self.code, "Upstream failure: {}", self.message);
                }
                _ => error!(code = ?self.code, "Request failed: {}", self.message),
            }

            (status, Json(ErrorResponse::from(self))).into_response()
        }
    }
}
