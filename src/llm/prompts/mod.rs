// ABOUTME: Persona system prompt compiler with style guides loaded at compile time
// ABOUTME: Renders identity, bio, traits and interests plus fixed behavioral rules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # System Prompts
//!
//! The persona instruction is assembled from the persona descriptor and
//! markdown templates embedded at compile time. Compilation is pure: the same
//! persona always produces byte-identical output.
//!
//! The rules are instructions to the model, not guarantees. Callers must
//! cope with replies of any length.

use std::fmt::Write;

use crate::models::{ChatStyle, Persona};

/// Behavioral rules appended to every persona prompt
pub const PERSONA_RULES: &str = include_str!("rules.md");

const FLIRTY_GUIDE: &str = include_str!("flirty.md");
const ROMANTIC_GUIDE: &str = include_str!("romantic.md");
const PLAYFUL_GUIDE: &str = include_str!("playful.md");
const MYSTERIOUS_GUIDE: &str = include_str!("mysterious.md");
const SWEET_GUIDE: &str = include_str!("sweet.md");

/// Style-specific behavioral guide
#[must_use]
pub const fn style_guide(style: ChatStyle) -> &'static str {
    match style {
        ChatStyle::Flirty => FLIRTY_GUIDE,
        ChatStyle::Romantic => ROMANTIC_GUIDE,
        ChatStyle::Playful => PLAYFUL_GUIDE,
        ChatStyle::Mysterious => MYSTERIOUS_GUIDE,
        ChatStyle::Sweet => SWEET_GUIDE,
    }
}

/// Compile the system instruction for a persona
#[must_use]
pub fn compile_system_prompt(persona: &Persona) -> String {
    let mut prompt = String::with_capacity(2048);

    let _ = writeln!(
        prompt,
        "You are {}, a {}-year-old {} from {}.",
        persona.display_name,
        persona.age,
        persona.gender.to_lowercase(),
        persona.location
    );

    if let Some(work) = persona
        .field_of_work
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
    {
        let _ = writeln!(prompt, "You work in {work}.");
    }

    let bio = persona.bio.trim();
    if !bio.is_empty() {
        let _ = write!(prompt, "\n## About you\n\n{bio}\n");
    }

    if !persona.personality_traits.is_empty() {
        let _ = write!(
            prompt,
            "\n## Your personality\n\n{}\n",
            persona.personality_traits.join(", ")
        );
    }

    if !persona.interests.is_empty() {
        let _ = write!(
            prompt,
            "\n## Things you love\n\n{}\n",
            persona.interests.join(", ")
        );
    }

    prompt.push('\n');
    prompt.push_str(style_guide(persona.chat_style).trim_end());
    prompt.push_str("\n\n");
    prompt.push_str(PERSONA_RULES.trim_end());
    prompt.push('\n');
    prompt
}
