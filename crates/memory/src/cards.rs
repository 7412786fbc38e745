//! Persisted character cards and the window → card binding.
//!
//! A card is bound to at most one window: binding it somewhere else moves it.

use ringtale_core::character::{Card, CharacterStore};
use ringtale_core::error::MemoryError;
use ringtale_core::memory::KeyValueStore;
use ringtale_core::window::{KEY_NAMESPACE, WindowId};
use std::sync::Arc;
use tracing::{info, warn};

const CARD_PREFIX: &str = "ringtale.cards.";
const BINDING_KEY: &str = "binding";

pub struct CardRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl CardRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Insert or replace a card.
    pub fn upsert(&self, card: &Card) -> Result<(), MemoryError> {
        if card.id.trim().is_empty() {
            return Err(MemoryError::Storage("card id must not be empty".into()));
        }
        let json = serde_json::to_string(card).map_err(|e| MemoryError::Corrupted {
            key: card.id.clone(),
            reason: e.to_string(),
        })?;
        self.store.set(&format!("{CARD_PREFIX}{}", card.id), &json)
    }

    pub fn get(&self, id: &str) -> Result<Option<Card>, MemoryError> {
        let key = format!("{CARD_PREFIX}{id}");
        match self.store.get(&key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| MemoryError::Corrupted {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// All stored cards, by id. Corrupted entries are skipped.
    pub fn list(&self) -> Result<Vec<Card>, MemoryError> {
        let mut cards = Vec::new();
        for key in self.store.keys(CARD_PREFIX)? {
            let id = &key[CARD_PREFIX.len()..];
            match self.get(id) {
                Ok(Some(card)) => cards.push(card),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable card"),
            }
        }
        Ok(cards)
    }

    /// The card id bound to `window`, if any.
    pub fn bound_card_id(&self, window: &WindowId) -> Option<String> {
        match self.store.get(&window.scoped_key(BINDING_KEY)) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!(window = %window, error = %e, "Failed to read card binding");
                None
            }
        }
    }

    pub fn unbind(&self, window: &WindowId) -> Result<bool, MemoryError> {
        self.store.remove(&window.scoped_key(BINDING_KEY))
    }

    /// Windows currently bound to `card_id`.
    fn windows_bound_to(&self, card_id: &str) -> Result<Vec<WindowId>, MemoryError> {
        let mut windows = Vec::new();
        for key in self.store.keys(&format!("{KEY_NAMESPACE}:"))? {
            if let Some(window) = WindowId::from_scoped_key(&key, BINDING_KEY)
                && self.store.get(&key)?.as_deref() == Some(card_id)
            {
                windows.push(window);
            }
        }
        Ok(windows)
    }
}

impl CharacterStore for CardRegistry {
    fn card_for_window(&self, window: &WindowId) -> Option<Card> {
        let id = self.bound_card_id(window)?;
        match self.get(&id) {
            Ok(card) => card,
            Err(e) => {
                warn!(window = %window, error = %e, "Bound card is unreadable");
                None
            }
        }
    }

    fn bind(&self, window: &WindowId, character_id: &str) -> Result<(), MemoryError> {
        if self.get(character_id)?.is_none() {
            return Err(MemoryError::Storage(format!(
                "no card with id '{character_id}'"
            )));
        }
        for other in self.windows_bound_to(character_id)? {
            if &other != window {
                self.unbind(&other)?;
                info!(window = %other, card = %character_id, "Card moved off window");
            }
        }
        self.store
            .set(&window.scoped_key(BINDING_KEY), character_id)?;
        info!(window = %window, card = %character_id, "Card bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn registry() -> CardRegistry {
        let reg = CardRegistry::new(Arc::new(InMemoryStore::new()));
        for id in ["lin", "mo"] {
            reg.upsert(&Card {
                id: id.into(),
                name: id.to_uppercase(),
                ..Card::default()
            })
            .unwrap();
        }
        reg
    }

    #[test]
    fn bind_and_lookup() {
        let reg = registry();
        let w = WindowId::sanitize("win-a");
        assert!(reg.card_for_window(&w).is_none());
        reg.bind(&w, "lin").unwrap();
        assert_eq!(reg.card_for_window(&w).unwrap().name, "LIN");
    }

    #[test]
    fn card_moves_between_windows() {
        let reg = registry();
        let a = WindowId::sanitize("win-a");
        let b = WindowId::sanitize("win-b");
        reg.bind(&a, "lin").unwrap();
        reg.bind(&b, "lin").unwrap();
        assert!(reg.card_for_window(&a).is_none());
        assert_eq!(reg.bound_card_id(&b).as_deref(), Some("lin"));
    }

    #[test]
    fn rebinding_a_window_replaces_its_card() {
        let reg = registry();
        let a = WindowId::sanitize("win-a");
        reg.bind(&a, "lin").unwrap();
        reg.bind(&a, "mo").unwrap();
        assert_eq!(reg.card_for_window(&a).unwrap().id, "mo");
    }

    #[test]
    fn binding_unknown_card_fails() {
        let reg = registry();
        assert!(reg.bind(&WindowId::sanitize("win-a"), "ghost").is_err());
    }

    #[test]
    fn list_returns_all_cards() {
        let reg = registry();
        let ids: Vec<String> = reg.list().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["lin", "mo"]);
    }
}
