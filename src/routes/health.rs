// ABOUTME: Health check route handlers for service monitoring
// ABOUTME: Reports database reachability and the configured completion provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use crate::resources::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .with_state(resources)
    }

    /// Does not call the provider; upstream reachability is not our health
    async fn health(State(resources): State<Arc<ServerResources>>) -> (StatusCode, Json<Value>) {
        let database_ok = match resources.database.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Health check database ping failed: {e}");
                false
            }
        };

        let status = if database_ok {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        (
            status,
            Json(json!({
                "status": if database_ok { "healthy" } else { "degraded" },
                "database": if database_ok { "ok" } else { "unreachable" },
                "provider": resources.provider.name(),
                "model": resources.provider.default_model(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
    }
}
