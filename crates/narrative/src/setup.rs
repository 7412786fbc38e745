//! Card setup assistant and window initializer.

use crate::extract::{json_object, string_field};
use crate::orchestrator::{AiOrchestrator, GenerateRequest};
use crate::prompts;
use ringtale_core::character::Card;
use ringtale_core::error::ScopeError;
use ringtale_core::language::Language;
use ringtale_core::provider::{PromptInput, TurnRole};
use ringtale_core::window::WindowId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Input to the window initializer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializerInput {
    pub card: Card,
    pub window_id: String,
    #[serde(default)]
    pub user_persona: String,
    /// Allow seeding contacts, moments and the wallet.
    #[serde(default)]
    pub allow_flag: bool,
    #[serde(default)]
    pub opening_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedContact {
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedMoment {
    #[serde(default)]
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletEvent {
    pub amount: f64,
    #[serde(default)]
    pub memo: String,
}

/// What the initializer seeds a fresh window with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedPayload {
    #[serde(default)]
    pub contacts: Vec<SeedContact>,
    #[serde(default)]
    pub moments: Vec<SeedMoment>,
    #[serde(default)]
    pub wallet_event: Option<WalletEvent>,
    #[serde(default)]
    pub persona_patch: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitializerError {
    #[error("initializer output rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

pub struct SetupAssistant {
    orchestrator: Arc<AiOrchestrator>,
    language: Language,
}

impl SetupAssistant {
    pub fn new(orchestrator: Arc<AiOrchestrator>, language: Language) -> Self {
        Self {
            orchestrator,
            language,
        }
    }

    /// Ask the setup role to fill the card's empty fields.
    ///
    /// Returns only fields that were empty before and came back non-empty.
    /// Malformed output yields an empty map.
    pub async fn fill_card(&self, window: &WindowId, card: &Card, preference: &str) -> BTreeMap<String, String> {
        let empty = card.empty_fields();
        if empty.is_empty() {
            return BTreeMap::new();
        }
        let request = GenerateRequest::new(
            window.clone(),
            TurnRole::Setup,
            PromptInput::Messages(prompts::setup_messages(card, preference, &empty, self.language)),
        )
        .with_character(&card.id);
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return BTreeMap::new();
        }
        let Some(map) = response.usable_text().and_then(json_object) else {
            debug!(window = %window, "Setup output has no JSON object");
            return BTreeMap::new();
        };

        let filled: BTreeMap<String, String> = empty
            .iter()
            .filter_map(|field| {
                let value = match map.get(*field)? {
                    Value::String(s) => s.trim().to_string(),
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                        .join(", "),
                    _ => return None,
                };
                (!value.is_empty()).then(|| (field.to_string(), value))
            })
            .collect();
        info!(window = %window, card = %card.id, fields = filled.len(), "Setup assistant filled fields");
        filled
    }

    /// Seed a fresh window. Unparseable output is rejected.
    pub async fn initialize(&self, window: &WindowId, input: &InitializerInput) -> Result<SeedPayload, InitializerError> {
        let request = GenerateRequest::new(
            window.clone(),
            TurnRole::Initializer,
            PromptInput::Messages(prompts::initializer_messages(
                &input.card,
                &input.user_persona,
                &input.opening_text,
                input.allow_flag,
                self.language,
            )),
        )
        .with_character(&input.card.id);
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return Err(InitializerError::Rejected("stale response".into()));
        }
        let text = response
            .usable_text()
            .ok_or_else(|| InitializerError::Rejected(response.error.clone().unwrap_or_else(|| "empty output".into())))?;
        let map = json_object(text).ok_or_else(|| InitializerError::Rejected("no JSON object".into()))?;
        let persona_patch = string_field(&map, "persona_patch");
        let mut payload: SeedPayload = serde_json::from_value(Value::Object(map))
            .map_err(|e| InitializerError::Rejected(e.to_string()))?;
        payload.persona_patch = persona_patch;
        payload.contacts.retain(|c| !c.name.trim().is_empty());
        payload.moments.retain(|m| !m.text.trim().is_empty());

        if !input.allow_flag {
            payload.contacts.clear();
            payload.moments.clear();
            payload.wallet_event = None;
        }
        info!(
            window = %window,
            contacts = payload.contacts.len(),
            moments = payload.moments.len(),
            "Window initialized"
        );
        Ok(payload)
    }
}
