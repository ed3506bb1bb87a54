// ABOUTME: Unified LLM provider selector chosen once from configuration
// ABOUTME: Wraps the Gemini and Groq adapters behind one LlmProvider implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LLM Provider Selector
//!
//! The backend is picked by `PERSONA_LLM_PROVIDER` (`gemini` by default, or
//! `groq`). Users never choose a provider per request.

use async_trait::async_trait;
use tracing::info;

use super::{
    ChatRequest, ChatResponse, ChatStream, GeminiProvider, GroqProvider, LlmCapabilities,
    LlmProvider,
};
use crate::config::{LlmProviderConfig, LlmProviderType};
use crate::errors::AppError;

/// Unified chat provider that wraps Gemini or Groq
pub enum ChatProvider {
    /// Google Gemini, chat-with-history request shape
    Gemini(GeminiProvider),
    /// Groq, flat messages-array request shape
    Groq(GroqProvider),
}

impl ChatProvider {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the selected provider has no API key
    pub fn from_config(config: &LlmProviderConfig) -> Result<Self, AppError> {
        let api_key = config.active_api_key().ok_or_else(|| {
            AppError::config(format!(
                "{} must be set when {}={}",
                config.provider.api_key_env_var(),
                LlmProviderType::ENV_VAR,
                config.provider
            ))
        })?;

        let provider = match config.provider {
            LlmProviderType::Gemini => {
                let mut provider = GeminiProvider::new(api_key);
                if let Some(url) = &config.gemini_base_url {
                    provider = provider.with_base_url(url);
                }
                if let Some(model) = &config.model {
                    provider = provider.with_default_model(model);
                }
                Self::Gemini(provider)
            }
            LlmProviderType::Groq => {
                let mut provider = GroqProvider::new(api_key);
                if let Some(url) = &config.groq_base_url {
                    provider = provider.with_base_url(url);
                }
                if let Some(model) = &config.model {
                    provider = provider.with_default_model(model);
                }
                Self::Groq(provider)
            }
        };

        info!(
            "LLM provider initialized: {} (model: {})",
            provider.display_name(),
            provider.default_model()
        );
        Ok(provider)
    }

    fn inner(&self) -> &dyn LlmProvider {
        match self {
            Self::Gemini(p) => p,
            Self::Groq(p) => p,
        }
    }
}

#[async_trait]
impl LlmProvider for ChatProvider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn display_name(&self) -> &'static str {
        self.inner().display_name()
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.inner().capabilities()
    }

    fn default_model(&self) -> &str {
        self.inner().default_model()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        self.inner().complete(request).await
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.inner().complete_stream(request).await
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        self.inner().health_check().await
    }
}
