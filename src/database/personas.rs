// ABOUTME: Persona store resolving bot profile ids to normalized personality descriptors
// ABOUTME: Tolerates list and style fields stored as JSON, double-encoded JSON, or plain text
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::format_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::{parse_string_list, ChatStyle, Persona};

/// Persona persistence
///
/// Records are owned by the profile-management side of the product; the chat
/// pipeline only reads them. A malformed record never blocks chat: list fields
/// that fail to decode become empty, and an unknown style becomes playful.
#[derive(Clone)]
pub struct PersonaStore {
    pool: SqlitePool,
}

impl PersonaStore {
    /// Create a new persona store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch and normalize a persona
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if no persona has this id, or a database error
    pub async fn get_persona(&self, id: &str) -> AppResult<Persona> {
        let row = sqlx::query(
            r"
            SELECT id, display_name, age, gender, location, bio,
                   personality_traits, interests, chat_style, field_of_work
            FROM personas
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get persona: {e}")))?;

        row.map(|r| row_to_persona(&r))
            .ok_or_else(|| AppError::not_found(format!("Persona {id}")).with_resource_id(id))
    }

    /// List all personas ordered by display name
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_personas(&self) -> AppResult<Vec<Persona>> {
        let rows = sqlx::query(
            r"
            SELECT id, display_name, age, gender, location, bio,
                   personality_traits, interests, chat_style, field_of_work
            FROM personas
            ORDER BY display_name ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list personas: {e}")))?;

        Ok(rows.iter().map(row_to_persona).collect())
    }

    /// Insert or replace a persona
    ///
    /// Lists are written as JSON arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database write fails
    pub async fn upsert_persona(&self, persona: &Persona) -> AppResult<()> {
        let traits = serde_json::to_string(&persona.personality_traits)?;
        let interests = serde_json::to_string(&persona.interests)?;

        sqlx::query(
            r"
            INSERT INTO personas (id, display_name, age, gender, location, bio,
                                  personality_traits, interests, chat_style, field_of_work, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                age = excluded.age,
                gender = excluded.gender,
                location = excluded.location,
                bio = excluded.bio,
                personality_traits = excluded.personality_traits,
                interests = excluded.interests,
                chat_style = excluded.chat_style,
                field_of_work = excluded.field_of_work,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&persona.id)
        .bind(&persona.display_name)
        .bind(i64::from(persona.age))
        .bind(&persona.gender)
        .bind(&persona.location)
        .bind(&persona.bio)
        .bind(traits)
        .bind(interests)
        .bind(persona.chat_style.as_str())
        .bind(persona.field_of_work.as_deref())
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert persona: {e}")))?;

        debug!(persona.id = %persona.id, "Persona stored");
        Ok(())
    }
}

fn row_to_persona(r: &SqliteRow) -> Persona {
    let traits: String = r.get("personality_traits");
    let interests: String = r.get("interests");
    let style: String = r.get("chat_style");
    let age: i64 = r.get("age");
    let field_of_work: Option<String> = r.get("field_of_work");

    Persona {
        id: r.get("id"),
        display_name: r.get("display_name"),
        age: u32::try_from(age).unwrap_or(0),
        gender: r.get("gender"),
        location: r.get("location"),
        bio: r.get("bio"),
        personality_traits: parse_string_list(&traits),
        interests: parse_string_list(&interests),
        chat_style: ChatStyle::normalize(&style),
        field_of_work: field_of_work.filter(|f| !f.trim().is_empty()),
    }
}
