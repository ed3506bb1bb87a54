// ABOUTME: Shared server resources handed to every route handler
// ABOUTME: Owns the database, the selected completion provider and the chat orchestrator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::llm::{ChatProvider, LlmProvider};

/// Centralized resource container, shared as `Arc<ServerResources>`
#[derive(Clone)]
pub struct ServerResources {
    /// Database handle
    pub database: Database,
    /// Completion backend chosen at startup
    pub provider: Arc<dyn LlmProvider>,
    /// Chat turn driver
    pub orchestrator: ChatOrchestrator,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Wire resources around an already-built provider
    #[must_use]
    pub fn new(database: Database, provider: Arc<dyn LlmProvider>, config: ServerConfig) -> Self {
        let orchestrator = ChatOrchestrator::new(database.clone(), Arc::clone(&provider), config.chat);
        Self {
            database,
            provider,
            orchestrator,
            config: Arc::new(config),
        }
    }

    /// Connect to the database and build the configured provider
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the provider has
    /// no API key
    pub async fn from_config(config: ServerConfig) -> AppResult<Self> {
        let provider: Arc<dyn LlmProvider> = Arc::new(ChatProvider::from_config(&config.llm)?);
        let database = Database::new(&config.database).await?;
        Ok(Self::new(database, provider, config))
    }
}
