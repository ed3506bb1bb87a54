// ABOUTME: Tests for environment-driven server configuration
// ABOUTME: Serialized because every test mutates process environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::env;

use persona_chat_server::config::{DatabaseUrl, LlmProviderType, ServerConfig};
use persona_chat_server::errors::ErrorCode;
use persona_chat_server::llm::{ChatProvider, LlmProvider};
use serial_test::serial;

const VARS: &[&str] = &[
    "HTTP_PORT",
    "ENVIRONMENT",
    "DATABASE_URL",
    "PERSONA_LLM_PROVIDER",
    "PERSONA_LLM_MODEL",
    "GEMINI_API_KEY",
    "GROQ_API_KEY",
    "GEMINI_API_BASE_URL",
    "GROQ_API_BASE_URL",
    "CHAT_MESSAGE_COST",
    "CHAT_HISTORY_WINDOW",
    "CHAT_MAX_OUTPUT_TOKENS",
    "CHAT_TEMPERATURE",
    "CHAT_TOP_P",
    "CHAT_TOP_K",
    "CORS_ALLOWED_ORIGINS",
    "REQUEST_TIMEOUT_SECS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_with_gemini_key() {
    clear_env();
    env::set_var("GEMINI_API_KEY", "g-key");

    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.llm.provider, LlmProviderType::Gemini);
    assert_eq!(config.chat.message_cost, 1);
    assert_eq!(config.chat.history_window, 15);
    assert_eq!(config.cors_allowed_origins, vec!["*"]);
    assert!(!config.database.is_memory());
    assert!(config.summary().contains("API Key: Configured"));
    assert!(!config.summary().contains("g-key"));

    clear_env();
}

#[test]
#[serial]
fn test_missing_key_for_selected_provider_fails() {
    clear_env();
    env::set_var("PERSONA_LLM_PROVIDER", "groq");
    env::set_var("GEMINI_API_KEY", "only-gemini");

    let err = ServerConfig::from_env().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigError);
    assert!(err.message.contains("GROQ_API_KEY"));

    clear_env();
}

#[test]
#[serial]
fn test_overrides_are_parsed() {
    clear_env();
    env::set_var("PERSONA_LLM_PROVIDER", "Groq");
    env::set_var("GROQ_API_KEY", "q-key");
    env::set_var("PERSONA_LLM_MODEL", "llama-3.1-8b-instant");
    env::set_var("DATABASE_URL", "sqlite::memory:");
    env::set_var("CHAT_MESSAGE_COST", "2");
    env::set_var("CHAT_HISTORY_WINDOW", "6");
    env::set_var("CORS_ALLOWED_ORIGINS", "http://localhost:3000, https://chat.example.com");
    env::set_var("HTTP_PORT", "9090");

    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.http_port, 9090);
    assert_eq!(config.database, DatabaseUrl::Memory);
    assert_eq!(config.chat.message_cost, 2);
    assert_eq!(config.chat.history_window, 6);
    assert_eq!(config.cors_allowed_origins.len(), 2);

    let provider = ChatProvider::from_config(&config.llm).unwrap();
    assert_eq!(provider.name(), "groq");
    assert_eq!(provider.default_model(), "llama-3.1-8b-instant");

    clear_env();
}

#[test]
#[serial]
fn test_invalid_numbers_are_config_errors() {
    clear_env();
    env::set_var("GEMINI_API_KEY", "g-key");

    env::set_var("HTTP_PORT", "not-a-port");
    let err = ServerConfig::from_env().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigError);
    assert!(err.message.contains("HTTP_PORT"));
    env::remove_var("HTTP_PORT");

    env::set_var("CHAT_MESSAGE_COST", "0");
    assert!(ServerConfig::from_env().is_err());
    env::remove_var("CHAT_MESSAGE_COST");

    env::set_var("CHAT_TOP_P", "1.5");
    assert!(ServerConfig::from_env().is_err());

    clear_env();
}
