// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Loads server, database, provider credentials, and chat tuning from env vars
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management
//!
//! Configuration is read once at startup and then passed explicitly to the
//! components that need it. Provider credentials live in [`LlmProviderConfig`]
//! and are injected into provider constructors; nothing reads them from the
//! process environment afterwards.

use std::env;
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

use super::types::{Environment, LlmProviderType};
use crate::constants::{chat, ports, sampling};
use crate::errors::{AppError, AppResult};

/// Type-safe database location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `SQLite` database file
    SQLite {
        /// Path to the database file
        path: PathBuf,
    },
    /// In-memory `SQLite` (tests and demos)
    Memory,
}

impl DatabaseUrl {
    /// Default on-disk location
    pub const DEFAULT: &'static str = "sqlite:./data/persona_chat.db";

    /// Parse a `DATABASE_URL` value
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path_str = s.strip_prefix("sqlite:").unwrap_or(s);
        let path_str = path_str.strip_prefix("//").unwrap_or(path_str);
        if path_str == ":memory:" {
            Self::Memory
        } else {
            Self::SQLite {
                path: PathBuf::from(path_str),
            }
        }
    }

    /// Convert to an sqlx connection string
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::Memory => "sqlite::memory:".to_owned(),
        }
    }

    /// Check if this is an in-memory database
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::parse_url(Self::DEFAULT)
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// Credentials and endpoints for the completion backends
#[derive(Clone, Default)]
pub struct LlmProviderConfig {
    /// Which backend serves chat turns
    pub provider: LlmProviderType,
    /// Model override; each provider has its own default
    pub model: Option<String>,
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Groq API key
    pub groq_api_key: Option<String>,
    /// Override for the Gemini API base URL
    pub gemini_base_url: Option<String>,
    /// Override for the Groq API base URL
    pub groq_base_url: Option<String>,
}

impl LlmProviderConfig {
    /// Read provider selection and credentials from the environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            provider: env::var(LlmProviderType::ENV_VAR)
                .map(|s| LlmProviderType::from_str_or_default(&s))
                .unwrap_or_default(),
            model: non_empty_var(LlmProviderType::MODEL_ENV_VAR),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            groq_api_key: non_empty_var("GROQ_API_KEY"),
            gemini_base_url: non_empty_var("GEMINI_API_BASE_URL"),
            groq_base_url: non_empty_var("GROQ_API_BASE_URL"),
        }
    }

    /// API key for the selected provider
    #[must_use]
    pub fn active_api_key(&self) -> Option<&str> {
        match self.provider {
            LlmProviderType::Gemini => self.gemini_api_key.as_deref(),
            LlmProviderType::Groq => self.groq_api_key.as_deref(),
        }
    }
}

impl Debug for LlmProviderConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("gemini_base_url", &self.gemini_base_url)
            .field("groq_base_url", &self.groq_base_url)
            .finish()
    }
}

/// Chat metering and sampling knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatSettings {
    /// Credits debited per successful turn
    pub message_cost: i64,
    /// Most recent messages supplied as context
    pub history_window: u32,
    /// Output token ceiling
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling mass
    pub top_p: f32,
    /// Top-k cutoff (ignored by backends without top-k)
    pub top_k: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            message_cost: chat::MESSAGE_COST,
            history_window: chat::HISTORY_WINDOW,
            max_output_tokens: sampling::MAX_OUTPUT_TOKENS,
            temperature: sampling::TEMPERATURE,
            top_p: sampling::TOP_P,
            top_k: sampling::TOP_K,
        }
    }
}

impl ChatSettings {
    /// Read chat tuning from the environment
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a value does not parse or is out of range
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let settings = Self {
            message_cost: parse_var("CHAT_MESSAGE_COST", defaults.message_cost)?,
            history_window: parse_var("CHAT_HISTORY_WINDOW", defaults.history_window)?,
            max_output_tokens: parse_var("CHAT_MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            temperature: parse_var("CHAT_TEMPERATURE", defaults.temperature)?,
            top_p: parse_var("CHAT_TOP_P", defaults.top_p)?,
            top_k: parse_var("CHAT_TOP_K", defaults.top_k)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate ranges
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value
    pub fn validate(&self) -> AppResult<()> {
        if self.message_cost < 1 {
            return Err(AppError::config("CHAT_MESSAGE_COST must be at least 1"));
        }
        if self.history_window == 0 {
            return Err(AppError::config("CHAT_HISTORY_WINDOW must be at least 1"));
        }
        if self.max_output_tokens == 0 {
            return Err(AppError::config("CHAT_MAX_OUTPUT_TOKENS must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AppError::config("CHAT_TEMPERATURE must be between 0 and 2"));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(AppError::config("CHAT_TOP_P must be between 0 and 1"));
        }
        Ok(())
    }
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Database location
    pub database: DatabaseUrl,
    /// Completion backend configuration
    pub llm: LlmProviderConfig,
    /// Chat metering and sampling
    pub chat: ChatSettings,
    /// Allowed CORS origins (`*` for any)
    pub cors_allowed_origins: Vec<String>,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any value fails to parse or validate
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");

        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file found or failed to load: {e}");
        }

        let config = Self {
            http_port: parse_var("HTTP_PORT", ports::DEFAULT_HTTP_PORT)?,
            environment: Environment::from_str_or_default(&env_var_or(
                "ENVIRONMENT",
                "development",
            )),
            database: DatabaseUrl::parse_url(&env_var_or("DATABASE_URL", DatabaseUrl::DEFAULT)),
            llm: LlmProviderConfig::from_env(),
            chat: ChatSettings::from_env()?,
            cors_allowed_origins: parse_origins(&env_var_or("CORS_ALLOWED_ORIGINS", "*")),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 120)?,
        };

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unusable values, including a missing
    /// API key for the selected provider
    pub fn validate(&self) -> AppResult<()> {
        if self.http_port == 0 {
            return Err(AppError::config("HTTP_PORT must be non-zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::config("REQUEST_TIMEOUT_SECS must be non-zero"));
        }
        if self.llm.active_api_key().is_none() {
            return Err(AppError::config(format!(
                "{} is not set",
                self.llm.provider.api_key_env_var()
            )));
        }
        self.chat.validate()
    }

    /// Get a summary of the configuration for logging (without secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Persona Chat Server Configuration:\n\
             - HTTP Port: {}\n\
             - Environment: {}\n\
             - Database: {}\n\
             - LLM Provider: {} (model: {})\n\
             - API Key: {}\n\
             - Message Cost: {} credit(s)\n\
             - History Window: {} messages\n\
             - Sampling: temperature={} top_p={} top_k={} max_tokens={}\n\
             - CORS Origins: {}\n\
             - Request Timeout: {}s",
            self.http_port,
            self.environment,
            if self.database.is_memory() {
                "SQLite (in-memory)"
            } else {
                "SQLite"
            },
            self.llm.provider,
            self.llm.model.as_deref().unwrap_or("default"),
            if self.llm.active_api_key().is_some() {
                "Configured"
            } else {
                "Missing"
            },
            self.chat.message_cost,
            self.chat.history_window,
            self.chat.temperature,
            self.chat.top_p,
            self.chat.top_k,
            self.chat.max_output_tokens,
            self.cors_allowed_origins.join(","),
            self.request_timeout_secs,
        )
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Get environment variable if set and non-empty
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to a default when unset
fn parse_var<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Parse comma-separated CORS origins
fn parse_origins(origins_str: &str) -> Vec<String> {
    if origins_str.trim() == "*" {
        vec!["*".to_owned()]
    } else {
        origins_str
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
