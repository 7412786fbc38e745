//! Matcher turn: relevance notes drawn from LTM and persona memory.
//!
//! Enabled per window by the first LTM hand-off. The notes are advisory;
//! any failure simply yields no notes.

use crate::orchestrator::{AiOrchestrator, GenerateRequest};
use crate::prompts;
use ringtale_core::language::Language;
use ringtale_core::markers::section;
use ringtale_core::provider::{PromptInput, TurnRole};
use ringtale_core::window::WindowId;
use ringtale_memory::WindowMemoryState;
use std::sync::Arc;
use tracing::debug;

/// Notes longer than this are cut.
const MAX_NOTES_CHARS: usize = 600;

pub struct Matcher {
    orchestrator: Arc<AiOrchestrator>,
    language: Language,
}

impl Matcher {
    pub fn new(orchestrator: Arc<AiOrchestrator>, language: Language) -> Self {
        Self {
            orchestrator,
            language,
        }
    }

    /// Relevance notes for `user_input`, or `None` when the matcher is off
    /// for this window or found nothing.
    pub async fn notes(
        &self,
        window: &WindowId,
        character_id: &str,
        memory: &WindowMemoryState,
        user_input: &str,
    ) -> Option<String> {
        if !memory.matcher_enabled {
            return None;
        }
        let request = GenerateRequest::new(
            window.clone(),
            TurnRole::Utility,
            PromptInput::Messages(prompts::matcher_messages(
                user_input,
                &memory.ltm,
                &memory.persona,
                self.language,
            )),
        )
        .with_character(character_id);
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return None;
        }
        let notes = clean_notes(response.usable_text()?);
        debug!(window = %window, found = notes.is_some(), "Matcher finished");
        notes
    }
}

fn clean_notes(text: &str) -> Option<String> {
    let text = text.trim();
    let upper = text.to_ascii_uppercase();
    if upper == "NONE" || upper.starts_with("NONE.") || text == "无" {
        return None;
    }
    if section::ALL.iter().any(|l| text.contains(l)) {
        return None;
    }
    Some(text.chars().take(MAX_NOTES_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use ringtale_core::event::EventBus;
    use ringtale_memory::{InMemoryStore, WindowMemoryStore};
    use ringtale_providers::ProviderRouter;

    fn matcher(provider: Arc<ScriptedProvider>) -> Matcher {
        let memory = Arc::new(WindowMemoryStore::new(Arc::new(InMemoryStore::new())));
        let orch = AiOrchestrator::new(
            ProviderRouter::single(provider, "mock"),
            memory,
            Arc::new(EventBus::default()),
        );
        Matcher::new(Arc::new(orch), Language::Zh)
    }

    #[tokio::test]
    async fn disabled_matcher_makes_no_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let m = matcher(provider.clone());
        let notes = m
            .notes(&WindowId::sanitize("w"), "c", &WindowMemoryState::default(), "hi")
            .await;
        assert!(notes.is_none());
        assert_eq!(provider.calls(TurnRole::Utility), 0);
    }

    #[tokio::test]
    async fn enabled_matcher_returns_notes() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(TurnRole::Utility, "- 玩家怕黑");
        provider.push(TurnRole::Utility, "NONE");
        let m = matcher(provider);
        let memory = WindowMemoryState {
            matcher_enabled: true,
            ltm: "玩家怕黑。".into(),
            ..WindowMemoryState::default()
        };
        let w = WindowId::sanitize("w");
        assert_eq!(m.notes(&w, "c", &memory, "关灯").await.as_deref(), Some("- 玩家怕黑"));
        assert!(m.notes(&w, "c", &memory, "你好").await.is_none());
    }

    #[test]
    fn leaked_labels_are_dropped() {
        assert!(clean_notes("【LONG-TERM MEMORY】玩家怕黑").is_none());
    }
}
