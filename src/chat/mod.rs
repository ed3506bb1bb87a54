// ABOUTME: Chat orchestrator driving one persona chat turn from credit check to billing
// ABOUTME: Streams provider output to the caller and finalizes the turn in one transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Orchestrator
//!
//! A turn moves through
//! `Received → CreditChecked → ConversationResolved → HistoryLoaded →
//! PromptCompiled → Generating → Streaming* → Completing → Persisted | Failed`.
//!
//! Everything up to opening the provider stream happens before
//! [`ChatOrchestrator::send_message`] returns, so those failures surface as
//! plain errors with their own HTTP status. From then on a spawned task owns
//! the provider stream and reports through [`ChatEvent`]s.
//!
//! ## Billing
//!
//! The pre-check only reads the balance. The authoritative debit is the last
//! statement of the finalization transaction, which also appends both
//! messages and bumps the conversation. A provider failure therefore costs
//! nothing, and a debit that loses a race against another tab rolls the whole
//! turn back.
//!
//! ## Disconnects
//!
//! If the caller stops listening, the task keeps draining the provider and
//! still finalizes: the completion was already paid for upstream.
//! Turn tasks are tracked so shutdown can wait for them with
//! [`ChatOrchestrator::drain`].

/// Chat turn events and wire frames
pub mod events;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, Instrument, Span};

pub use events::{ChatEvent, ChatFrame};

use crate::config::ChatSettings;
use crate::constants::chat::{EVENT_CHANNEL_CAPACITY, FINALIZE_MAX_ATTEMPTS, MAX_MESSAGE_CHARS};
use crate::database::{
    retry_transaction, ConversationLedger, CreditLedger, Database, MessageLog, NewMessage,
    SqliteTransactionGuard,
};
use crate::errors::{AppError, AppResult};
use crate::llm::{
    compile_system_prompt, ChatMessage, ChatRequest, ChatStream, LlmProvider, StreamChunk,
};
use crate::logging::ChatLogger;
use crate::models::{MessageRecord, MessageRole, Persona};

/// Stream of events for one turn
pub type ChatEventStream = ReceiverStream<ChatEvent>;

/// Input to a chat turn
#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    /// Caller, already authenticated upstream
    pub user_id: String,
    /// Persona being messaged
    pub persona_id: String,
    /// Message text
    pub message: String,
    /// Conversation the client believes it is in; advisory only
    pub conversation_id: Option<String>,
}

/// A running streamed turn
#[derive(Debug)]
pub struct ChatTurn {
    /// Conversation the turn is recorded in
    pub conversation_id: String,
    /// Events, starting with [`ChatEvent::ConversationId`]
    pub events: ChatEventStream,
}

/// Result of a completed non-streamed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnOutcome {
    /// Conversation the turn was recorded in
    pub conversation_id: String,
    /// Full reply text
    pub response: String,
    /// Credits debited
    pub credits_used: i64,
    /// Balance after the debit
    pub balance_after: i64,
}

/// Everything resolved before the provider is called
struct PreparedTurn {
    user_id: String,
    persona: Persona,
    conversation_id: String,
    message: String,
    received_at: DateTime<Utc>,
    llm_request: ChatRequest,
}

/// Drives chat turns
#[derive(Clone)]
pub struct ChatOrchestrator {
    database: Database,
    provider: Arc<dyn LlmProvider>,
    settings: ChatSettings,
    turns: TaskTracker,
}

impl ChatOrchestrator {
    /// Create a new orchestrator
    #[must_use]
    pub fn new(database: Database, provider: Arc<dyn LlmProvider>, settings: ChatSettings) -> Self {
        Self {
            database,
            provider,
            settings,
            turns: TaskTracker::new(),
        }
    }

    /// Streamed turns whose task has not finished yet
    #[must_use]
    pub fn turns_in_flight(&self) -> usize {
        self.turns.len()
    }

    /// Wait for every spawned turn to persist or fail
    ///
    /// Turns started after this call are still tracked and awaited.
    pub async fn drain(&self) {
        self.turns.close();
        self.turns.wait().await;
        self.turns.reopen();
    }

    /// The configured completion backend
    #[must_use]
    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    /// Start a streamed chat turn
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty or oversized message,
    /// `InsufficientCredits` when the balance is below the message cost (no
    /// writes happen), `ResourceNotFound` for an unknown persona, a provider
    /// error if the completion could not be opened, or a database error
    #[instrument(skip(self, request), fields(user.id = %request.user_id, persona.id = %request.persona_id))]
    pub async fn send_message(&self, request: ChatTurnRequest) -> AppResult<ChatTurn> {
        let prepared = self.prepare(&request).await.inspect_err(|e| {
            ChatLogger::log_turn_failed(&request.user_id, &request.persona_id, e);
        })?;

        let reply = self.open_reply(&prepared.llm_request).await.inspect_err(|e| {
            ChatLogger::log_turn_failed(&request.user_id, &request.persona_id, e);
        })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let conversation_id = prepared.conversation_id.clone();
        let orchestrator = self.clone();
        self.turns.spawn(
            async move { orchestrator.drive(prepared, reply, EventSink::new(tx)).await }
                .instrument(Span::current()),
        );

        Ok(ChatTurn {
            conversation_id,
            events: ReceiverStream::new(rx),
        })
    }

    /// Run a turn to completion without streaming
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_message`], plus any provider or finalization
    /// failure
    #[instrument(skip(self, request), fields(user.id = %request.user_id, persona.id = %request.persona_id))]
    pub async fn send_message_complete(&self, request: ChatTurnRequest) -> AppResult<ChatTurnOutcome> {
        match self.complete_turn(&request).await {
            Ok((prepared, response, balance_after)) => {
                ChatLogger::log_turn_completed(
                    &prepared.user_id,
                    &prepared.persona.id,
                    &prepared.conversation_id,
                    balance_after,
                    response.chars().count(),
                );
                Ok(ChatTurnOutcome {
                    conversation_id: prepared.conversation_id,
                    response,
                    credits_used: self.settings.message_cost,
                    balance_after,
                })
            }
            Err(e) => {
                ChatLogger::log_turn_failed(&request.user_id, &request.persona_id, &e);
                Err(e)
            }
        }
    }

    async fn complete_turn(&self, request: &ChatTurnRequest) -> AppResult<(PreparedTurn, String, i64)> {
        let prepared = self.prepare(request).await?;
        let response = self.provider.complete(&prepared.llm_request).await?;
        if response.content.trim().is_empty() {
            return Err(AppError::external_service(
                self.provider.display_name(),
                "Empty completion",
            ));
        }
        let balance_after = self.finalize(&prepared, &response.content).await?;
        Ok((prepared, response.content, balance_after))
    }

    /// Validate, check credit, resolve the conversation and build the request
    async fn prepare(&self, request: &ChatTurnRequest) -> AppResult<PreparedTurn> {
        let message = validate_message(&request.message)?;
        if request.user_id.trim().is_empty() {
            return Err(AppError::invalid_input("userId is required"));
        }

        // Optimistic read; the debit re-checks atomically
        let balance = self.database.credits().balance(&request.user_id).await?;
        if balance < self.settings.message_cost {
            return Err(
                AppError::insufficient_credits(balance, self.settings.message_cost)
                    .with_user_id(&request.user_id),
            );
        }

        let persona = self.database.personas().get_persona(&request.persona_id).await?;

        let conversation = self
            .database
            .conversations()
            .resolve(&request.user_id, &persona.id)
            .await?;
        if let Some(claimed) = request
            .conversation_id
            .as_deref()
            .filter(|claimed| *claimed != conversation.id)
        {
            debug!(
                claimed = %claimed,
                conversation.id = %conversation.id,
                "Ignoring client-supplied conversation id"
            );
        }

        let history = self
            .database
            .messages()
            .recent_messages(&conversation.id, self.settings.history_window)
            .await?;

        let llm_request = self.build_request(&persona, &history, &message);

        Ok(PreparedTurn {
            user_id: request.user_id.clone(),
            persona,
            conversation_id: conversation.id,
            message,
            received_at: Utc::now(),
            llm_request,
        })
    }

    fn build_request(
        &self,
        persona: &Persona,
        history: &[MessageRecord],
        message: &str,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(compile_system_prompt(persona)));
        messages.extend(
            history
                .iter()
                .map(|m| ChatMessage::new(m.role.into(), m.content.clone())),
        );
        messages.push(ChatMessage::user(message));

        ChatRequest::new(messages)
            .with_temperature(self.settings.temperature)
            .with_sampling(self.settings.top_p, self.settings.top_k)
            .with_max_tokens(self.settings.max_output_tokens)
    }

    /// Open the provider reply as a stream, even for non-streaming backends
    async fn open_reply(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        if self.provider.capabilities().supports_streaming() {
            return self
                .provider
                .complete_stream(&request.clone().with_streaming())
                .await;
        }

        let response = self.provider.complete(request).await?;
        let chunk = StreamChunk {
            delta: response.content,
            is_final: true,
            finish_reason: response.finish_reason,
        };
        Ok(Box::pin(stream::iter([Ok::<_, AppError>(chunk)])))
    }

    /// Forward the provider stream, then finalize or report failure
    async fn drive(self, turn: PreparedTurn, mut reply_stream: ChatStream, mut sink: EventSink) {
        sink.emit(ChatEvent::ConversationId(turn.conversation_id.clone()))
            .await;

        let mut reply = String::new();
        let mut failure = None;
        while let Some(item) = reply_stream.next().await {
            match item {
                Ok(chunk) => {
                    if !chunk.delta.is_empty() {
                        reply.push_str(&chunk.delta);
                        sink.emit(ChatEvent::Chunk(chunk.delta)).await;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(reply_stream);

        if failure.is_none() && reply.trim().is_empty() {
            failure = Some(AppError::external_service(
                self.provider.display_name(),
                "Empty completion",
            ));
        }

        let outcome = match failure {
            Some(e) => Err(e),
            None => self.finalize(&turn, &reply).await,
        };

        match outcome {
            Ok(balance_after) => {
                ChatLogger::log_turn_completed(
                    &turn.user_id,
                    &turn.persona.id,
                    &turn.conversation_id,
                    balance_after,
                    reply.chars().count(),
                );
                sink.emit(ChatEvent::Done {
                    credits_used: self.settings.message_cost,
                    conversation_id: turn.conversation_id,
                    response: reply,
                })
                .await;
            }
            Err(e) => {
                ChatLogger::log_turn_failed(&turn.user_id, &turn.persona.id, &e);
                sink.emit(ChatEvent::from_error(&e)).await;
            }
        }
    }

    /// Persist both messages, bump the conversation and debit, atomically
    ///
    /// Returns the balance after the debit.
    async fn finalize(&self, turn: &PreparedTurn, reply: &str) -> AppResult<i64> {
        let pool = self.database.pool();
        let cost = self.settings.message_cost;
        retry_transaction(
            move || finalize_once(pool, turn, reply, cost),
            FINALIZE_MAX_ATTEMPTS,
        )
        .await
    }
}

async fn finalize_once(
    pool: &SqlitePool,
    turn: &PreparedTurn,
    reply: &str,
    cost: i64,
) -> AppResult<i64> {
    let mut guard = SqliteTransactionGuard::begin(pool).await?;
    let conn = guard.executor()?;
    let replied_at = Utc::now().max(turn.received_at);

    MessageLog::append_in(
        conn,
        &NewMessage {
            conversation_id: &turn.conversation_id,
            user_id: &turn.user_id,
            persona_id: &turn.persona.id,
            role: MessageRole::User,
            content: &turn.message,
            timestamp: turn.received_at,
            credits_used: 0,
        },
    )
    .await?;

    MessageLog::append_in(
        conn,
        &NewMessage {
            conversation_id: &turn.conversation_id,
            user_id: &turn.user_id,
            persona_id: &turn.persona.id,
            role: MessageRole::Bot,
            content: reply,
            timestamp: replied_at,
            credits_used: cost,
        },
    )
    .await?;

    ConversationLedger::record_exchange_in(conn, &turn.conversation_id, reply, replied_at).await?;

    let transaction = CreditLedger::debit_in(
        conn,
        &turn.user_id,
        cost,
        &format!("Message to {}", turn.persona.display_name),
        Some(json!({
            "conversationId": turn.conversation_id,
            "personaId": turn.persona.id,
        })),
    )
    .await?;

    guard.commit().await?;
    Ok(transaction.balance_after)
}

/// Reject empty and oversized messages; returns the trimmed text
fn validate_message(raw: &str) -> AppResult<String> {
    let message = raw.trim();
    if message.is_empty() {
        return Err(AppError::invalid_input("Message cannot be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::invalid_input(format!(
            "Message is too long (max {MAX_MESSAGE_CHARS} characters)"
        )));
    }
    Ok(message.to_owned())
}

/// Event sender that goes quiet once the caller hangs up
struct EventSink {
    tx: mpsc::Sender<ChatEvent>,
    connected: bool,
}

impl EventSink {
    const fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            tx,
            connected: true,
        }
    }

    async fn emit(&mut self, event: ChatEvent) {
        if self.connected && self.tx.send(event).await.is_err() {
            self.connected = false;
            debug!("Client disconnected; turn will still be finalized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message("  hi  ").ok(), Some("hi".to_owned()));
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        // Counted in characters, not bytes
        assert!(validate_message(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }
}
