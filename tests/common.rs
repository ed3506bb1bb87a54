// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides in-memory databases, seeded personas, funded users and server resources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
//! Shared test utilities for `persona_chat_server`

use std::sync::{Arc, Once};

use anyhow::Result;
use persona_chat_server::{
    config::{
        ChatSettings, DatabaseUrl, Environment, LlmProviderConfig, LlmProviderType, ServerConfig,
    },
    database::Database,
    llm::LlmProvider,
    models::{ChatStyle, Persona, TransactionType},
    resources::ServerResources,
};
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Fresh in-memory database with the schema applied
pub async fn create_test_database() -> Result<Database> {
    init_test_logging();
    Ok(Database::new(&DatabaseUrl::Memory).await?)
}

/// The persona most scenarios talk to
pub fn sophie() -> Persona {
    Persona {
        id: "sophie".to_owned(),
        display_name: "Sophie".to_owned(),
        age: 26,
        gender: "Female".to_owned(),
        location: "Lisbon".to_owned(),
        bio: "Sunset chaser and amateur painter.".to_owned(),
        personality_traits: vec!["curious".to_owned(), "warm".to_owned()],
        interests: vec!["painting".to_owned(), "surfing".to_owned()],
        chat_style: ChatStyle::Flirty,
        field_of_work: Some("graphic design".to_owned()),
    }
}

/// Store Sophie and return her id
pub async fn seed_sophie(database: &Database) -> Result<String> {
    let persona = sophie();
    database.personas().upsert_persona(&persona).await?;
    Ok(persona.id)
}

/// New user id with `credits` purchased (none granted when zero)
pub async fn create_funded_user(database: &Database, credits: i64) -> Result<String> {
    let user_id = format!("user-{}", Uuid::new_v4());
    if credits > 0 {
        database
            .credits()
            .add_credits(&user_id, credits, TransactionType::Purchase, "Test credits", None)
            .await?;
    }
    Ok(user_id)
}

/// Configuration suitable for tests; never read from the environment
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        environment: Environment::Testing,
        database: DatabaseUrl::Memory,
        llm: LlmProviderConfig {
            provider: LlmProviderType::Gemini,
            gemini_api_key: Some("test-key".to_owned()),
            ..LlmProviderConfig::default()
        },
        chat: ChatSettings::default(),
        cors_allowed_origins: vec!["*".to_owned()],
        request_timeout_secs: 30,
    }
}

/// Server resources over a fresh database and the given provider
pub async fn create_test_server_resources(
    provider: Arc<dyn LlmProvider>,
) -> Result<Arc<ServerResources>> {
    let database = create_test_database().await?;
    Ok(Arc::new(ServerResources::new(database, provider, test_config())))
}
