// ABOUTME: Main library entry point for the persona chat server
// ABOUTME: Streams AI persona conversations over SSE with per-message credit metering
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

// Crate-level attributes:
// - recursion_limit: raised for the nested serde derives
// - deny(unsafe_code): no unsafe anywhere in the server
#![recursion_limit = "256"]
#![deny(unsafe_code)]

//! # Persona Chat Server
//!
//! A chat backend where users talk to fixed AI personas. Every reply is
//! generated by an upstream LLM (Gemini or Groq), streamed to the client as
//! server-sent events, and paid for with credits.
//!
//! ## Architecture
//!
//! - **Database**: persona store, conversation ledger, message log and credit
//!   ledger on one `SQLite` pool
//! - **LLM**: provider adapters behind the [`llm::LlmProvider`] trait, plus the
//!   system prompt compiler
//! - **Chat**: the orchestrator that validates, meters, streams and persists a
//!   turn
//! - **Routes**: the HTTP surface, including the streaming transport
//! - **Client**: a reader that reassembles a streamed reply
//!
//! ## Quick Start
//!
//! 1. Load personas with the `seed-personas` binary
//! 2. Set `GEMINI_API_KEY` (or `PERSONA_LLM_PROVIDER=groq` and `GROQ_API_KEY`)
//! 3. Start the server with `persona-chat-server`

/// Shared error, constant and model definitions
pub use persona_core::{constants, errors, models};

/// Chat turn orchestration and event types
pub mod chat;

/// Client-side reader for streamed chat replies
pub mod client;

/// Environment-driven server configuration
pub mod config;

/// `SQLite` persistence for personas, conversations, messages and credits
pub mod database;

/// LLM provider adapters and prompt compilation
pub mod llm;

/// Structured logging setup
pub mod logging;

/// HTTP middleware (CORS, request tracing)
pub mod middleware;

/// Shared server resources
pub mod resources;

/// HTTP route handlers
pub mod routes;

/// HTTP server lifecycle
pub mod server;
