// ABOUTME: Persona route handlers for browsing the fixed persona list
// ABOUTME: Read-only; personas are loaded by the seed binary

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Persona;
use crate::resources::ServerResources;

/// Persona list
#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaListResponse {
    /// Ordered by display name
    pub personas: Vec<Persona>,
}

/// Persona routes handler
pub struct PersonaRoutes;

impl PersonaRoutes {
    /// Create all persona routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/personas", get(Self::list_personas))
            .route("/api/personas/:persona_id", get(Self::get_persona))
            .with_state(resources)
    }

    async fn list_personas(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Json<PersonaListResponse>, AppError> {
        let personas = resources.database.personas().list_personas().await?;
        Ok(Json(PersonaListResponse { personas }))
    }

    async fn get_persona(
        State(resources): State<Arc<ServerResources>>,
        Path(persona_id): Path<String>,
    ) -> Result<Json<Persona>, AppError> {
        Ok(Json(resources.database.personas().get_persona(&persona_id).await?))
    }
}
