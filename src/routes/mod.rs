// ABOUTME: Route module organization for the persona chat HTTP endpoints
// ABOUTME: Merges domain routers and applies tracing, CORS and timeout layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module
//!
//! Each domain module contains only route definitions and thin handlers that
//! delegate to the orchestrator or the ledgers.

/// Chat send and history routes
pub mod chat;
/// Credit balance and grant routes
pub mod credits;
/// Health check route
pub mod health;
/// Persona browse routes
pub mod personas;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use chat::ChatRoutes;
pub use credits::CreditRoutes;
pub use health::HealthRoutes;
pub use personas::PersonaRoutes;

use crate::middleware::{create_request_span, setup_cors};
use crate::resources::ServerResources;

/// Top-level router builder
pub struct AppRoutes;

impl AppRoutes {
    /// Build the complete application router
    pub fn router(resources: Arc<ServerResources>) -> Router {
        let timeout = Duration::from_secs(resources.config.request_timeout_secs);
        let cors = setup_cors(&resources.config);

        Router::new()
            .merge(ChatRoutes::routes(Arc::clone(&resources)))
            .merge(CreditRoutes::routes(Arc::clone(&resources)))
            .merge(PersonaRoutes::routes(Arc::clone(&resources)))
            .merge(HealthRoutes::routes(resources))
            .layer(TimeoutLayer::new(timeout))
            .layer(cors)
            .layer(TraceLayer::new_for_http().make_span_with(create_request_span))
    }
}
