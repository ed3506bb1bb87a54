// ABOUTME: HTTP server binary for the persona chat API
// ABOUTME: Loads configuration, connects storage and the LLM provider, then serves
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![recursion_limit = "256"]

//! # Persona Chat Server Binary
//!
//! Starts the chat API: persona browsing, credit balances and the streaming
//! `POST /api/chat/send` endpoint.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use persona_chat_server::{
    config::{DatabaseUrl, ServerConfig},
    logging,
    resources::ServerResources,
    server,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "persona-chat-server")]
#[command(about = "Persona chat API - streaming AI persona conversations with credit metering")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(url) = args.database_url.as_deref() {
        config.database = DatabaseUrl::parse_url(url);
    }

    logging::init_from_env()?;

    info!("Starting Persona Chat Server");
    info!("{}", config.summary());

    config.validate()?;

    let resources = match ServerResources::from_config(config).await {
        Ok(resources) => Arc::new(resources),
        Err(e) => {
            error!("Failed to initialize server resources: {e}");
            return Err(e.into());
        }
    };

    info!(
        provider = resources.provider.name(),
        model = resources.provider.default_model(),
        "LLM provider ready"
    );

    if let Err(e) = server::run(resources).await {
        error!("Server error: {e}");
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}
