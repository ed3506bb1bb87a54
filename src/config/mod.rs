// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Re-exports environment-driven server, provider, and chat settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module for the persona chat server
//!
//! - **Environment**: Server configuration from environment variables
//! - **Types**: Deployment environment and provider selection enums

/// Environment and server configuration
pub mod environment;
/// Shared configuration enums
pub mod types;

pub use environment::{ChatSettings, DatabaseUrl, LlmProviderConfig, ServerConfig};
pub use types::{Environment, LlmProviderType};
