// ABOUTME: Domain constants for chat metering, history windowing, and LLM sampling
// ABOUTME: Reference values used as configuration defaults across the server crate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Values here are defaults; the server crate lets operators override most of
//! them through environment configuration.

/// Chat metering and context constants
pub mod chat {
    /// Credits debited for one successful chat turn
    pub const MESSAGE_COST: i64 = 1;

    /// Number of most recent messages supplied to the model as context
    pub const HISTORY_WINDOW: u32 = 15;

    /// Maximum accepted length of an inbound user message (characters)
    pub const MAX_MESSAGE_CHARS: usize = 2000;

    /// Capacity of the per-turn event channel between generator and transport
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Maximum attempts for a finalization transaction blocked by a writer lock
    pub const FINALIZE_MAX_ATTEMPTS: u32 = 3;

    /// How long shutdown waits for running turns to finalize (seconds)
    pub const SHUTDOWN_DRAIN_SECS: u64 = 30;
}

/// LLM sampling defaults tuned for in-character, non-repetitive replies
pub mod sampling {
    /// Sampling temperature
    pub const TEMPERATURE: f32 = 0.9;

    /// Nucleus sampling mass
    pub const TOP_P: f32 = 0.95;

    /// Top-k sampling cutoff
    pub const TOP_K: u32 = 40;

    /// Output token ceiling; replies are meant to be one to four sentences
    pub const MAX_OUTPUT_TOKENS: u32 = 256;
}

/// Service identity strings used in logs and health responses
pub mod service_names {
    /// Server service name
    pub const PERSONA_CHAT_SERVER: &str = "persona-chat-server";
}

/// Network defaults
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
}
