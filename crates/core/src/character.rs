//! Character cards and the card store.
//!
//! A card splits into prompt fields and display-only fields. Only the prompt
//! fields ever reach a backend: [`Card::declaration`] and the setup field
//! table never touch `public_bio`.

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::window::WindowId;

/// Card fields the setup assistant may fill, by wire name.
pub const SETUP_FIELDS: [&str; 8] = [
    "name",
    "gender",
    "species",
    "world_lore",
    "appearance",
    "speaking_style",
    "reply_rules",
    "world_tags",
];

/// Gender plus an optional subtype (e.g. "male" / "omega").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gender {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
}

impl Gender {
    pub fn is_empty(&self) -> bool {
        self.kind.trim().is_empty() && self.subtype.trim().is_empty()
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind.trim(), self.subtype.trim()) {
            (k, "") => write!(f, "{k}"),
            ("", s) => write!(f, "{s}"),
            (k, s) => write!(f, "{k} ({s})"),
        }
    }
}

/// A character card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub species: String,
    #[serde(default)]
    pub world_tags: Vec<String>,
    #[serde(default)]
    pub world_lore: String,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub speaking_style: String,
    #[serde(default)]
    pub reply_rules: String,
    #[serde(default)]
    pub dynamic_traits: Vec<String>,
    /// Display-only. Never part of a prompt.
    #[serde(default)]
    pub public_bio: String,
}

impl Card {
    /// The character declaration layer: identity and style, no display
    /// fields, no reply rules (those are their own layer).
    pub fn declaration(&self) -> String {
        let mut lines = Vec::new();
        push_line(&mut lines, "Name", &self.name);
        push_line(&mut lines, "Gender", &self.gender.to_string());
        push_line(&mut lines, "Species", &self.species);
        push_line(&mut lines, "World", &self.world_tags.join(", "));
        push_line(&mut lines, "Lore", &self.world_lore);
        push_line(&mut lines, "Appearance", &self.appearance);
        push_line(&mut lines, "Speaking style", &self.speaking_style);
        lines.join("\n")
    }

    /// Dynamic traits rendered as a bullet list.
    pub fn traits_text(&self) -> String {
        self.dynamic_traits
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Read a setup field by wire name.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "name" => self.name.clone(),
            "gender" => self.gender.to_string(),
            "species" => self.species.clone(),
            "world_lore" => self.world_lore.clone(),
            "appearance" => self.appearance.clone(),
            "speaking_style" => self.speaking_style.clone(),
            "reply_rules" => self.reply_rules.clone(),
            "world_tags" => self.world_tags.join(", "),
            _ => return None,
        };
        Some(value)
    }

    /// Write a setup field by wire name. Returns `false` for unknown names.
    pub fn set_field(&mut self, name: &str, value: &str) -> bool {
        let value = value.trim().to_string();
        match name {
            "name" => self.name = value,
            "gender" => self.gender.kind = value,
            "species" => self.species = value,
            "world_lore" => self.world_lore = value,
            "appearance" => self.appearance = value,
            "speaking_style" => self.speaking_style = value,
            "reply_rules" => self.reply_rules = value,
            "world_tags" => {
                self.world_tags = value
                    .split([',', '，'])
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            _ => return false,
        }
        true
    }

    /// Setup fields that are currently empty.
    pub fn empty_fields(&self) -> Vec<&'static str> {
        SETUP_FIELDS
            .iter()
            .copied()
            .filter(|f| self.field(f).is_some_and(|v| v.trim().is_empty()))
            .collect()
    }
}

fn push_line(lines: &mut Vec<String>, label: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        lines.push(format!("{label}: {value}"));
    }
}

/// Supplies the active card per window.
///
/// Read-only from the pipeline's side except for the window binding.
pub trait CharacterStore: Send + Sync {
    /// The card bound to a window, if any.
    fn card_for_window(&self, window: &WindowId) -> Option<Card>;

    /// Bind a window to a card id, replacing any previous binding.
    fn bind(&self, window: &WindowId, character_id: &str) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Card {
        Card {
            id: "c1".into(),
            name: "Lin".into(),
            gender: Gender {
                kind: "male".into(),
                subtype: String::new(),
            },
            species: "human".into(),
            speaking_style: "curt".into(),
            public_bio: "SECRET BIO".into(),
            ..Card::default()
        }
    }

    #[test]
    fn declaration_excludes_display_fields() {
        let text = card().declaration();
        assert!(text.contains("Name: Lin"));
        assert!(text.contains("Speaking style: curt"));
        assert!(!text.contains("SECRET BIO"));
    }

    #[test]
    fn empty_fields_lists_only_blank_setup_fields() {
        let fields = card().empty_fields();
        assert!(fields.contains(&"appearance"));
        assert!(fields.contains(&"world_tags"));
        assert!(!fields.contains(&"name"));
        assert!(!fields.contains(&"gender"));
    }

    #[test]
    fn set_field_splits_tags() {
        let mut c = card();
        assert!(c.set_field("world_tags", " modern, city ，campus "));
        assert_eq!(c.world_tags, vec!["modern", "city", "campus"]);
        assert!(!c.set_field("public_bio", "nope"));
    }

    #[test]
    fn gender_display() {
        let g = Gender {
            kind: "male".into(),
            subtype: "alpha".into(),
        };
        assert_eq!(g.to_string(), "male (alpha)");
        assert!(Gender::default().is_empty());
    }
}
