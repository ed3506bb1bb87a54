// ABOUTME: Persona descriptor and chat style enumeration for synthetic chat profiles
// ABOUTME: Lenient normalization of trait lists and style values stored in mixed encodings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

/// Voice a persona uses when chatting
///
/// Selects which behavioral guide the prompt compiler appends to the system
/// instruction. Unknown or malformed values fall back to [`ChatStyle::Playful`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStyle {
    /// Teasing, complimentary, light innuendo
    Flirty,
    /// Warm, affectionate, sincere
    Romantic,
    /// Jokey, energetic, banter-driven
    #[default]
    Playful,
    /// Reserved, intriguing, reveals little at a time
    Mysterious,
    /// Gentle, caring, encouraging
    Sweet,
}

impl ChatStyle {
    /// All styles, in a stable order
    pub const ALL: [Self; 5] = [
        Self::Flirty,
        Self::Romantic,
        Self::Playful,
        Self::Mysterious,
        Self::Sweet,
    ];

    /// Canonical lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flirty => "flirty",
            Self::Romantic => "romantic",
            Self::Playful => "playful",
            Self::Mysterious => "mysterious",
            Self::Sweet => "sweet",
        }
    }

    /// Normalize a stored chat style value
    ///
    /// Accepts the bare style name, a JSON-encoded string, or a JSON object
    /// carrying a `chatStyle` or `style` key. Anything else yields the default.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(style) = trimmed.parse() {
            return style;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Self::from_json(&value),
            Err(_) => Self::default(),
        }
    }

    /// Normalize a chat style already decoded as JSON
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => s.parse().unwrap_or_default(),
            Value::Object(map) => map
                .get("chatStyle")
                .or_else(|| map.get("style"))
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }
}

impl Display for ChatStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatStyle {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flirty" => Ok(Self::Flirty),
            "romantic" => Ok(Self::Romantic),
            "playful" => Ok(Self::Playful),
            "mysterious" => Ok(Self::Mysterious),
            "sweet" => Ok(Self::Sweet),
            other => Err(AppError::invalid_input(format!(
                "Unknown chat style: {other}"
            ))),
        }
    }
}

/// Structured personality descriptor for a synthetic chat profile
///
/// Read-only from the chat pipeline's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Persona identifier (the bot profile id clients send)
    pub id: String,
    /// Name shown to users
    pub display_name: String,
    /// Stated age
    pub age: u32,
    /// Stated gender
    pub gender: String,
    /// City or region
    pub location: String,
    /// Free-text biography
    pub bio: String,
    /// Personality traits, deduplicated, in stored order
    pub personality_traits: Vec<String>,
    /// Interests, deduplicated, in stored order
    pub interests: Vec<String>,
    /// Voice used for replies
    pub chat_style: ChatStyle,
    /// Profession, if the profile lists one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_of_work: Option<String>,
}

/// Decode a list field stored in any of the encodings seen in persona records
///
/// Handles native JSON arrays, JSON strings that themselves contain an array,
/// and plain comma-separated text. Blank entries and duplicates are dropped.
/// Objects, numbers and unparseable input yield an empty list.
#[must_use]
pub fn parse_string_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => collect_unique(items.iter().filter_map(Value::as_str)),
        Ok(Value::String(inner)) => {
            // Double-encoded: a JSON string whose content is the real list
            match serde_json::from_str::<Value>(&inner) {
                Ok(Value::Array(items)) => collect_unique(items.iter().filter_map(Value::as_str)),
                _ => collect_unique(inner.split(',')),
            }
        }
        Ok(_) => Vec::new(),
        Err(_) if trimmed.starts_with('[') || trimmed.starts_with('{') => Vec::new(),
        Err(_) => collect_unique(trimmed.split(',')),
    }
}

fn collect_unique<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items.map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_owned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_encodings() {
        let expected = vec!["hiking".to_owned(), "jazz".to_owned()];
        assert_eq!(parse_string_list(r#"["hiking","jazz"]"#), expected);
        assert_eq!(parse_string_list(r#""[\"hiking\",\"jazz\"]""#), expected);
        assert_eq!(parse_string_list("hiking, jazz ,hiking"), expected);
    }

    #[test]
    fn test_string_list_malformed_is_empty() {
        assert!(parse_string_list(r#"["hiking","#).is_empty());
        assert!(parse_string_list(r#"{"a":1}"#).is_empty());
        assert!(parse_string_list("42").is_empty());
        assert!(parse_string_list("   ").is_empty());
    }

    #[test]
    fn test_chat_style_normalize() {
        assert_eq!(ChatStyle::normalize("flirty"), ChatStyle::Flirty);
        assert_eq!(ChatStyle::normalize(" Romantic "), ChatStyle::Romantic);
        assert_eq!(ChatStyle::normalize(r#""sweet""#), ChatStyle::Sweet);
        assert_eq!(
            ChatStyle::normalize(r#"{"chatStyle":"mysterious"}"#),
            ChatStyle::Mysterious
        );
        assert_eq!(ChatStyle::normalize(r#"{"style":"flirty"}"#), ChatStyle::Flirty);
    }

    #[test]
    fn test_chat_style_fallback() {
        assert_eq!(ChatStyle::normalize("grumpy"), ChatStyle::Playful);
        assert_eq!(ChatStyle::normalize(r#"{"mood":"sweet"}"#), ChatStyle::Playful);
        assert_eq!(ChatStyle::normalize("{not json"), ChatStyle::Playful);
        assert_eq!(ChatStyle::normalize(""), ChatStyle::Playful);
    }
}
