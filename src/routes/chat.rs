// ABOUTME: Chat route handlers for sending persona messages and reading history
// ABOUTME: Streams turns as server-sent events or answers a single JSON object
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Chat routes
//!
//! `POST /api/chat/send` is the streaming transport. Each turn event becomes
//! one `data: {json}\n\n` frame; see [`crate::chat::ChatFrame`] for the shape.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::chat::ChatTurnRequest;
use crate::errors::{AppError, ErrorCode};
use crate::models::{ConversationRecord, MessageRecord};
use crate::resources::ServerResources;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /api/chat/send`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Caller
    pub user_id: String,
    /// Persona being messaged
    #[serde(alias = "personaId")]
    pub bot_profile_id: String,
    /// Message text
    pub message: String,
    /// Advisory conversation id
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Stream the reply (default) or answer one JSON object
    #[serde(default = "default_stream")]
    pub stream: bool,
}

const fn default_stream() -> bool {
    true
}

/// Non-streamed reply
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// Always true
    pub success: bool,
    /// Full reply text
    pub response: String,
    /// Conversation the turn was recorded in
    pub conversation_id: String,
    /// Credits debited
    pub credits_used: i64,
}

/// Failure body for chat endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable explanation
    pub response: String,
    /// Machine-readable kind
    pub code: ErrorCode,
}

/// Query for `GET /api/chat/conversations`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    /// Owner of the conversations
    pub user_id: String,
    /// Maximum number to return
    #[serde(default = "default_conversation_limit")]
    pub limit: i64,
}

const fn default_conversation_limit() -> i64 {
    20
}

/// Query for `GET /api/chat/conversations/:conversation_id/messages`
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Page size
    #[serde(default = "default_message_limit")]
    pub limit: i64,
    /// Messages to skip
    #[serde(default)]
    pub offset: i64,
}

const fn default_message_limit() -> i64 {
    50
}

/// Conversation list
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    /// Conversations, most recently active first
    pub conversations: Vec<ConversationRecord>,
}

/// Message page
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesListResponse {
    /// Messages, oldest first
    pub messages: Vec<MessageRecord>,
    /// Total messages in the conversation
    pub total: i64,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat/send", post(Self::send_message))
            .route("/api/chat/conversations", get(Self::list_conversations))
            .route(
                "/api/chat/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            .with_state(resources)
    }

    async fn send_message(
        State(resources): State<Arc<ServerResources>>,
        body: Result<Json<SendMessageRequest>, JsonRejection>,
    ) -> Response {
        let Json(body) = match body {
            Ok(body) => body,
            Err(rejection) => {
                return chat_error(&AppError::invalid_input(rejection.body_text()));
            }
        };

        let request = ChatTurnRequest {
            user_id: body.user_id,
            persona_id: body.bot_profile_id,
            message: body.message,
            conversation_id: body.conversation_id,
        };

        if body.stream && resources.provider.capabilities().supports_streaming() {
            match resources.orchestrator.send_message(request).await {
                Ok(turn) => {
                    let mut events = turn.events;
                    let stream = async_stream::stream! {
                        while let Some(event) = events.next().await {
                            yield Ok::<_, Infallible>(Event::default().data(event.to_frame_json()));
                        }
                    };
                    Sse::new(stream)
                        .keep_alive(KeepAlive::default())
                        .into_response()
                }
                Err(e) => chat_error(&e),
            }
        } else {
            match resources.orchestrator.send_message_complete(request).await {
                Ok(outcome) => Json(SendMessageResponse {
                    success: true,
                    response: outcome.response,
                    conversation_id: outcome.conversation_id,
                    credits_used: outcome.credits_used,
                })
                .into_response(),
                Err(e) => chat_error(&e),
            }
        }
    }

    async fn list_conversations(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<ListConversationsQuery>,
    ) -> Result<Json<ConversationListResponse>, AppError> {
        if query.user_id.trim().is_empty() {
            return Err(AppError::invalid_input("userId is required"));
        }
        let conversations = resources
            .database
            .conversations()
            .list_for_user(&query.user_id, query.limit.clamp(1, 100))
            .await?;
        Ok(Json(ConversationListResponse { conversations }))
    }

    async fn get_messages(
        State(resources): State<Arc<ServerResources>>,
        Path(conversation_id): Path<String>,
        Query(query): Query<ListMessagesQuery>,
    ) -> Result<Json<MessagesListResponse>, AppError> {
        resources
            .database
            .conversations()
            .get(&conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found("Conversation").with_resource_id(&conversation_id)
            })?;

        let log = resources.database.messages();
        let messages = log
            .messages(&conversation_id, query.limit.clamp(1, 200), query.offset.max(0))
            .await?;
        let total = log.count(&conversation_id).await?;
        Ok(Json(MessagesListResponse { messages, total }))
    }
}

/// Render a chat failure as `{success:false, response, code}`
fn chat_error(error: &AppError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ChatErrorResponse {
            success: false,
            response: error.user_message(),
            code: error.code,
        }),
    )
        .into_response()
}
