// ABOUTME: Core data models for the persona chat platform
// ABOUTME: Re-exports Persona, conversation/message records, and credit transaction types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Data Models
//!
//! Plain data structures shared by the persistence layer, the chat
//! orchestrator and the HTTP surface. Every model serializes with camelCase
//! keys because that is what browser clients consume.
//!
//! ## Core Models
//!
//! - `Persona`: Synthetic chat personality the user converses with
//! - `ChatStyle`: Enumerated voice that selects a prompt template
//! - `ConversationRecord`: One conversation per (user, persona) pair
//! - `MessageRecord`: Append-only chat turns
//! - `CreditTransaction`: Audit trail entry for a balance change

mod conversation;
mod credits;
mod persona;

// Persona domain
pub use persona::{parse_string_list, ChatStyle, Persona};

// Conversation domain
pub use conversation::{ConversationRecord, MessageRecord, MessageRole};

// Credit domain
pub use credits::{CreditTransaction, TransactionType};
