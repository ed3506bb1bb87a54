// ABOUTME: Persona seeding utility for the persona chat server
// ABOUTME: Loads the fixed persona list and optional demo credit balances
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Persona seeder.
//!
//! Personas are read-only to the chat pipeline, so this binary is the only
//! writer. Seeding is idempotent: every persona is upserted by id.
//!
//! Usage:
//! ```bash
//! # Seed personas (uses DATABASE_URL from environment)
//! cargo run --bin seed-personas
//!
//! # Override database URL
//! cargo run --bin seed-personas -- --database-url sqlite:./data/persona_chat.db
//!
//! # Also grant 20 bonus credits to a demo user
//! cargo run --bin seed-personas -- --demo-user demo-user --demo-credits 20
//! ```

use std::env;

use anyhow::Result;
use clap::Parser;
use persona_chat_server::{
    config::DatabaseUrl,
    database::Database,
    models::{ChatStyle, Persona, TransactionType},
};
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "seed-personas",
    about = "Persona Chat Server Persona Seeder",
    long_about = "Create the fixed list of chat personas and optional demo credits"
)]
struct SeedArgs {
    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,

    /// User to receive demo credits
    #[arg(long)]
    demo_user: Option<String>,

    /// Bonus credits granted to the demo user
    #[arg(long, default_value_t = 10)]
    demo_credits: i64,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// Persona definition
struct SeedPersona {
    id: &'static str,
    display_name: &'static str,
    age: u32,
    gender: &'static str,
    location: &'static str,
    bio: &'static str,
    traits: &'static [&'static str],
    interests: &'static [&'static str],
    chat_style: ChatStyle,
    field_of_work: Option<&'static str>,
}

impl SeedPersona {
    fn to_persona(&self) -> Persona {
        Persona {
            id: self.id.to_owned(),
            display_name: self.display_name.to_owned(),
            age: self.age,
            gender: self.gender.to_owned(),
            location: self.location.to_owned(),
            bio: self.bio.to_owned(),
            personality_traits: self.traits.iter().map(|s| (*s).to_owned()).collect(),
            interests: self.interests.iter().map(|s| (*s).to_owned()).collect(),
            chat_style: self.chat_style,
            field_of_work: self.field_of_work.map(ToOwned::to_owned),
        }
    }
}

/// The browsable persona list
const PERSONAS: &[SeedPersona] = &[
    SeedPersona {
        id: "sophie",
        display_name: "Sophie",
        age: 26,
        gender: "Female",
        location: "Lisbon",
        bio: "Sunset chaser and amateur painter. I'll trade you a pastel de nata for a good story.",
        traits: &["curious", "warm", "a little sarcastic"],
        interests: &["painting", "surfing", "street food"],
        chat_style: ChatStyle::Flirty,
        field_of_work: Some("graphic design"),
    },
    SeedPersona {
        id: "emma",
        display_name: "Emma",
        age: 29,
        gender: "Female",
        location: "Edinburgh",
        bio: "Bookshop owner by day, stargazer by night. Tea is non-negotiable.",
        traits: &["thoughtful", "gentle", "romantic"],
        interests: &["poetry", "astronomy", "hiking"],
        chat_style: ChatStyle::Romantic,
        field_of_work: Some("bookselling"),
    },
    SeedPersona {
        id: "lucas",
        display_name: "Lucas",
        age: 31,
        gender: "Male",
        location: "Barcelona",
        bio: "Chef who thinks every problem can be solved with the right amount of garlic.",
        traits: &["funny", "energetic", "competitive"],
        interests: &["cooking", "football", "karaoke"],
        chat_style: ChatStyle::Playful,
        field_of_work: Some("restaurant kitchens"),
    },
    SeedPersona {
        id: "mila",
        display_name: "Mila",
        age: 27,
        gender: "Female",
        location: "Prague",
        bio: "Night trains, old cinemas and questions I rarely answer directly.",
        traits: &["enigmatic", "observant", "witty"],
        interests: &["film noir", "photography", "jazz"],
        chat_style: ChatStyle::Mysterious,
        field_of_work: None,
    },
    SeedPersona {
        id: "noah",
        display_name: "Noah",
        age: 28,
        gender: "Male",
        location: "Vancouver",
        bio: "Vet nurse, dog dad, and the friend who always remembers your birthday.",
        traits: &["kind", "patient", "encouraging"],
        interests: &["animals", "kayaking", "baking"],
        chat_style: ChatStyle::Sweet,
        field_of_work: Some("veterinary care"),
    },
];

#[tokio::main]
async fn main() -> Result<()> {
    let args = SeedArgs::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    info!("=== Persona Chat Server Persona Seeder ===");

    let database_url = args
        .database_url
        .or_else(|| env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DatabaseUrl::DEFAULT.to_owned());
    info!("Connecting to database: {database_url}");
    let database = Database::new(&DatabaseUrl::parse_url(&database_url)).await?;

    let store = database.personas();
    for seed in PERSONAS {
        store.upsert_persona(&seed.to_persona()).await?;
        info!("Seeded persona {} ({})", seed.display_name, seed.id);
    }

    if let Some(user_id) = args.demo_user.as_deref() {
        let transaction = database
            .credits()
            .add_credits(
                user_id,
                args.demo_credits,
                TransactionType::Bonus,
                "Welcome bonus",
                Some(json!({ "source": "seed-personas" })),
            )
            .await?;
        info!(
            "Granted {} credits to {user_id} (balance {})",
            args.demo_credits, transaction.balance_after
        );
    }

    info!("=== Seeding Complete ===");
    info!("Seeded {} personas", PERSONAS.len());
    Ok(())
}
