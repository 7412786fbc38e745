//! Per-window memory records.
//!
//! One [`WindowMemoryState`] per window, persisted as a JSON document under
//! `ringtale:{window}:memory`. Reads go through an in-process cache keyed by
//! window id; the store is the source of truth on first read and every
//! mutation writes through synchronously.
//!
//! Every setter merges into the existing record. Persistence failures are
//! logged and swallowed: the cached state stays authoritative for the
//! session, and callers never see a storage error.

use chrono::{DateTime, Utc};
use ringtale_core::memory::KeyValueStore;
use ringtale_core::window::{KEY_NAMESPACE, WindowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Key suffix for memory records.
pub const MEMORY_KEY: &str = "memory";

/// Hard upper bound on the raw-reply cache.
pub const MAX_RAW_CACHE_LIMIT: usize = 20;

/// Grammatical person the narrator uses for the player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Person {
    First,
    #[default]
    Second,
    Third,
}

impl Person {
    pub fn as_str(&self) -> &'static str {
        match self {
            Person::First => "first",
            Person::Second => "second",
            Person::Third => "third",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "1" | "i" => Some(Person::First),
            "second" | "2" | "you" => Some(Person::Second),
            "third" | "3" => Some(Person::Third),
            _ => None,
        }
    }
}

/// How the player is presented inside this window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityOverride {
    pub name: String,
    pub gender: String,
    pub height: String,
    pub address: Person,
}

/// Window-scoped rule layers (top of each stack).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverrides {
    pub system: String,
    pub user_persona: String,
}

/// Both override groups, as read by the rule resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOverrides {
    pub identity: IdentityOverride,
    pub rules: RuleOverrides,
}

/// A partial override update. `None` leaves a field untouched;
/// `Some("")` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverridesPatch {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub height: Option<String>,
    pub address: Option<Person>,
    pub system: Option<String>,
    pub user_persona: Option<String>,
}

/// A partial flag update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagsPatch {
    pub stm_auto: Option<bool>,
    pub ltm_auto: Option<bool>,
    pub persona_auto: Option<bool>,
}

/// Something that happened off-screen (a message sent, a call placed) that
/// the next narrator turn should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub kind: String,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl PendingEvent {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            summary: summary.into(),
            at: Utc::now(),
        }
    }
}

/// Everything remembered about one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowMemoryState {
    pub stm: String,
    pub ltm: String,
    pub persona: String,
    pub raw_cache: Vec<String>,
    pub pending_events: Vec<PendingEvent>,
    pub identity_override: IdentityOverride,
    pub rule_overrides: RuleOverrides,
    pub opening_text: String,
    pub is_first_turn: bool,
    pub has_ltm: bool,
    pub matcher_enabled: bool,
    pub stm_auto: bool,
    pub ltm_auto: bool,
    pub persona_auto: bool,
    pub raw_cache_limit: usize,
}

impl Default for WindowMemoryState {
    fn default() -> Self {
        Self {
            stm: String::new(),
            ltm: String::new(),
            persona: String::new(),
            raw_cache: Vec::new(),
            pending_events: Vec::new(),
            identity_override: IdentityOverride::default(),
            rule_overrides: RuleOverrides::default(),
            opening_text: String::new(),
            is_first_turn: true,
            has_ltm: false,
            matcher_enabled: false,
            stm_auto: true,
            ltm_auto: true,
            persona_auto: true,
            raw_cache_limit: 6,
        }
    }
}

impl WindowMemoryState {
    fn fresh(raw_cache_limit: usize) -> Self {
        Self {
            raw_cache_limit,
            ..Self::default()
        }
    }

    fn trim_raw_cache(&mut self) {
        let limit = self.raw_cache_limit.clamp(1, MAX_RAW_CACHE_LIMIT);
        if self.raw_cache.len() > limit {
            let excess = self.raw_cache.len() - limit;
            self.raw_cache.drain(..excess);
        }
    }

    /// Restore invariants on a record read back from storage.
    fn normalize(&mut self) {
        self.raw_cache_limit = self.raw_cache_limit.clamp(1, MAX_RAW_CACHE_LIMIT);
        self.trim_raw_cache();
        if !self.ltm.trim().is_empty() {
            self.has_ltm = true;
        }
    }
}

/// Read-through cache over the persisted per-window records.
pub struct WindowMemoryStore {
    store: Arc<dyn KeyValueStore>,
    cache: Mutex<HashMap<WindowId, WindowMemoryState>>,
    default_raw_limit: usize,
    pending_cap: usize,
}

impl WindowMemoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            default_raw_limit: 6,
            pending_cap: 100,
        }
    }

    /// Raw-cache limit for windows that have not chosen one.
    pub fn with_default_raw_limit(mut self, limit: usize) -> Self {
        self.default_raw_limit = limit.clamp(1, MAX_RAW_CACHE_LIMIT);
        self
    }

    pub fn with_pending_cap(mut self, cap: usize) -> Self {
        self.pending_cap = cap.max(1);
        self
    }

    fn load(&self, window: &WindowId) -> WindowMemoryState {
        let key = window.scoped_key(MEMORY_KEY);
        let mut state = match self.store.get(&key) {
            Ok(Some(json)) => match serde_json::from_str::<WindowMemoryState>(&json) {
                Ok(state) => state,
                Err(e) => {
                    warn!(window = %window, error = %e, "Corrupted memory record, starting fresh");
                    WindowMemoryState::fresh(self.default_raw_limit)
                }
            },
            Ok(None) => WindowMemoryState::fresh(self.default_raw_limit),
            Err(e) => {
                warn!(window = %window, error = %e, "Memory read failed, starting fresh");
                WindowMemoryState::fresh(self.default_raw_limit)
            }
        };
        state.normalize();
        state
    }

    fn persist(&self, window: &WindowId, state: &WindowMemoryState) {
        let key = window.scoped_key(MEMORY_KEY);
        let result = serde_json::to_string(state)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(&key, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(window = %window, error = %e, "Failed to persist window memory");
        }
    }

    /// Run `f` on the window's record, then write it through.
    fn update<R>(&self, window: &WindowId, f: impl FnOnce(&mut WindowMemoryState) -> R) -> R {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let state = cache
            .entry(window.clone())
            .or_insert_with(|| self.load(window));
        let out = f(state);
        self.persist(window, state);
        out
    }

    fn read<R>(&self, window: &WindowId, f: impl FnOnce(&WindowMemoryState) -> R) -> R {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let state = cache
            .entry(window.clone())
            .or_insert_with(|| self.load(window));
        f(state)
    }

    /// A copy of the whole record.
    pub fn snapshot(&self, window: &WindowId) -> WindowMemoryState {
        self.read(window, Clone::clone)
    }

    pub fn stm(&self, window: &WindowId) -> String {
        self.read(window, |s| s.stm.clone())
    }

    pub fn set_stm(&self, window: &WindowId, text: &str) {
        self.update(window, |s| s.stm = text.to_string());
    }

    pub fn ltm(&self, window: &WindowId) -> String {
        self.read(window, |s| s.ltm.clone())
    }

    /// Set LTM. Non-empty text marks the window as having LTM for good;
    /// emptying the field later does not unset it.
    pub fn set_ltm(&self, window: &WindowId, text: &str) {
        self.update(window, |s| {
            s.ltm = text.to_string();
            if !text.trim().is_empty() {
                s.has_ltm = true;
            }
        });
    }

    pub fn persona(&self, window: &WindowId) -> String {
        self.read(window, |s| s.persona.clone())
    }

    pub fn set_persona(&self, window: &WindowId, text: &str) {
        self.update(window, |s| s.persona = text.to_string());
    }

    /// Append a raw reply, then trim the cache to its limit (oldest first).
    pub fn push_raw_reply(&self, window: &WindowId, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.update(window, |s| {
            s.raw_cache.push(text.to_string());
            s.trim_raw_cache();
        });
    }

    /// The most recent raw replies in insertion order, at most `limit`
    /// (defaults to the window's cache limit).
    pub fn raw_replies(&self, window: &WindowId, limit: Option<usize>) -> Vec<String> {
        self.read(window, |s| {
            let limit = limit.unwrap_or(s.raw_cache_limit);
            let start = s.raw_cache.len().saturating_sub(limit);
            s.raw_cache[start..].to_vec()
        })
    }

    pub fn raw_cache_limit(&self, window: &WindowId) -> usize {
        self.read(window, |s| s.raw_cache_limit)
    }

    /// Set the raw-cache limit (clamped to 1..=20) and trim immediately.
    /// Returns the limit actually applied.
    pub fn set_raw_cache_limit(&self, window: &WindowId, limit: usize) -> usize {
        self.update(window, |s| {
            s.raw_cache_limit = limit.clamp(1, MAX_RAW_CACHE_LIMIT);
            s.trim_raw_cache();
            s.raw_cache_limit
        })
    }

    /// Queue an off-screen event. The oldest events are dropped past the cap.
    pub fn append_pending_event(&self, window: &WindowId, event: PendingEvent) {
        let cap = self.pending_cap;
        self.update(window, |s| {
            s.pending_events.push(event);
            if s.pending_events.len() > cap {
                let excess = s.pending_events.len() - cap;
                s.pending_events.drain(..excess);
            }
        });
    }

    /// Drain the pending events.
    pub fn take_pending_digest(&self, window: &WindowId) -> Vec<PendingEvent> {
        let has_events = self.read(window, |s| !s.pending_events.is_empty());
        if !has_events {
            return Vec::new();
        }
        self.update(window, |s| std::mem::take(&mut s.pending_events))
    }

    pub fn overrides(&self, window: &WindowId) -> WindowOverrides {
        self.read(window, |s| WindowOverrides {
            identity: s.identity_override.clone(),
            rules: s.rule_overrides.clone(),
        })
    }

    /// Merge an override patch into the record.
    pub fn set_overrides(&self, window: &WindowId, patch: OverridesPatch) {
        self.update(window, |s| {
            let id = &mut s.identity_override;
            if let Some(v) = patch.name {
                id.name = v.trim().to_string();
            }
            if let Some(v) = patch.gender {
                id.gender = v.trim().to_string();
            }
            if let Some(v) = patch.height {
                id.height = v.trim().to_string();
            }
            if let Some(v) = patch.address {
                id.address = v;
            }
            if let Some(v) = patch.system {
                s.rule_overrides.system = v;
            }
            if let Some(v) = patch.user_persona {
                s.rule_overrides.user_persona = v;
            }
        });
    }

    pub fn set_flags(&self, window: &WindowId, patch: FlagsPatch) {
        self.update(window, |s| {
            if let Some(v) = patch.stm_auto {
                s.stm_auto = v;
            }
            if let Some(v) = patch.ltm_auto {
                s.ltm_auto = v;
            }
            if let Some(v) = patch.persona_auto {
                s.persona_auto = v;
            }
        });
    }

    pub fn set_opening_text(&self, window: &WindowId, text: &str) {
        self.update(window, |s| s.opening_text = text.trim().to_string());
    }

    /// Record that the window's first narrator turn has been accepted.
    pub fn mark_turn_taken(&self, window: &WindowId) {
        if self.read(window, |s| s.is_first_turn) {
            self.update(window, |s| s.is_first_turn = false);
        }
    }

    pub fn enable_matcher(&self, window: &WindowId) {
        self.update(window, |s| s.matcher_enabled = true);
    }

    /// Apply a successful LTM consolidation in one write: LTM and persona are
    /// set, the matcher is enabled, and STM is cleared.
    pub fn complete_ltm_handoff(&self, window: &WindowId, ltm: &str, persona: &str) {
        self.update(window, |s| {
            s.ltm = ltm.trim().to_string();
            s.has_ltm = true;
            if !persona.trim().is_empty() {
                s.persona = persona.trim().to_string();
            }
            s.matcher_enabled = true;
            s.stm.clear();
        });
        debug!(window = %window, "LTM hand-off complete");
    }

    /// Clear memory tiers, the raw cache, pending events and flags.
    /// Overrides, the opening text and the raw-cache limit survive.
    pub fn reset(&self, window: &WindowId) {
        self.update(window, |s| {
            let kept = WindowMemoryState {
                identity_override: std::mem::take(&mut s.identity_override),
                rule_overrides: std::mem::take(&mut s.rule_overrides),
                opening_text: std::mem::take(&mut s.opening_text),
                raw_cache_limit: s.raw_cache_limit,
                ..WindowMemoryState::default()
            };
            *s = kept;
        });
    }

    /// Every window with a persisted or cached record, sorted.
    pub fn known_windows(&self) -> Vec<WindowId> {
        let mut windows = BTreeSet::new();
        match self.store.keys(&format!("{KEY_NAMESPACE}:")) {
            Ok(keys) => {
                windows.extend(
                    keys.iter()
                        .filter_map(|k| WindowId::from_scoped_key(k, MEMORY_KEY)),
                );
            }
            Err(e) => warn!(error = %e, "Failed to list stored windows"),
        }
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        windows.extend(cache.keys().cloned());
        windows.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use ringtale_core::error::MemoryError;

    fn store() -> (Arc<InMemoryStore>, WindowMemoryStore) {
        let kv = Arc::new(InMemoryStore::new());
        let mem = WindowMemoryStore::new(kv.clone());
        (kv, mem)
    }

    fn win(id: &str) -> WindowId {
        WindowId::sanitize(id)
    }

    /// A store whose writes always fail.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        fn get(&self, _key: &str) -> Result<Option<String>, MemoryError> {
            Err(MemoryError::Storage("disk gone".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), MemoryError> {
            Err(MemoryError::Storage("disk gone".into()))
        }
        fn remove(&self, _key: &str) -> Result<bool, MemoryError> {
            Err(MemoryError::Storage("disk gone".into()))
        }
        fn keys(&self, _prefix: &str) -> Result<Vec<String>, MemoryError> {
            Err(MemoryError::Storage("disk gone".into()))
        }
    }

    #[test]
    fn raw_cache_keeps_last_limit_in_order() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.set_raw_cache_limit(&w, 3);
        for i in 0..7 {
            mem.push_raw_reply(&w, &format!("reply {i}"));
        }
        assert_eq!(
            mem.raw_replies(&w, None),
            vec!["reply 4", "reply 5", "reply 6"]
        );
        assert_eq!(mem.raw_replies(&w, Some(2)), vec!["reply 5", "reply 6"]);
    }

    #[test]
    fn raw_cache_limit_is_clamped_and_trims() {
        let (_, mem) = store();
        let w = win("win-a");
        for i in 0..6 {
            mem.push_raw_reply(&w, &format!("r{i}"));
        }
        assert_eq!(mem.set_raw_cache_limit(&w, 0), 1);
        assert_eq!(mem.raw_replies(&w, None), vec!["r5"]);
        assert_eq!(mem.set_raw_cache_limit(&w, 99), MAX_RAW_CACHE_LIMIT);
    }

    #[test]
    fn empty_replies_are_not_cached() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.push_raw_reply(&w, "   ");
        assert!(mem.raw_replies(&w, None).is_empty());
    }

    #[test]
    fn ltm_flag_is_sticky() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.set_ltm(&w, "They met in spring.");
        mem.set_ltm(&w, "");
        let state = mem.snapshot(&w);
        assert!(state.has_ltm);
        assert_eq!(state.ltm, "");
        mem.reset(&w);
        assert!(!mem.snapshot(&w).has_ltm);
    }

    #[test]
    fn setters_merge_without_clobbering() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.set_stm(&w, "stm text");
        mem.set_overrides(
            &w,
            OverridesPatch {
                name: Some(" Ayu ".into()),
                address: Some(Person::Third),
                ..Default::default()
            },
        );
        mem.set_overrides(
            &w,
            OverridesPatch {
                height: Some("170cm".into()),
                system: Some("Window rules".into()),
                ..Default::default()
            },
        );
        let ov = mem.overrides(&w);
        assert_eq!(ov.identity.name, "Ayu");
        assert_eq!(ov.identity.height, "170cm");
        assert_eq!(ov.identity.address, Person::Third);
        assert_eq!(ov.rules.system, "Window rules");
        assert_eq!(mem.stm(&w), "stm text");
    }

    #[test]
    fn pending_events_drain_and_cap() {
        let kv = Arc::new(InMemoryStore::new());
        let mem = WindowMemoryStore::new(kv).with_pending_cap(3);
        let w = win("win-a");
        for i in 0..5 {
            mem.append_pending_event(&w, PendingEvent::new("wechat", format!("msg {i}")));
        }
        let digest = mem.take_pending_digest(&w);
        assert_eq!(digest.len(), 3);
        assert_eq!(digest[0].summary, "msg 2");
        assert!(mem.take_pending_digest(&w).is_empty());
    }

    #[test]
    fn handoff_sets_ltm_persona_matcher_and_clears_stm() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.set_stm(&w, "long stm");
        mem.complete_ltm_handoff(&w, "world", "persona");
        let s = mem.snapshot(&w);
        assert_eq!(s.stm, "");
        assert_eq!(s.ltm, "world");
        assert_eq!(s.persona, "persona");
        assert!(s.has_ltm && s.matcher_enabled);
    }

    #[test]
    fn records_persist_and_reload() {
        let (kv, mem) = store();
        let w = win("win-a");
        mem.set_stm(&w, "persisted");
        mem.mark_turn_taken(&w);

        let fresh = WindowMemoryStore::new(kv.clone());
        let s = fresh.snapshot(&w);
        assert_eq!(s.stm, "persisted");
        assert!(!s.is_first_turn);
        assert!(kv.get("ringtale:win-a:memory").unwrap().is_some());
    }

    #[test]
    fn windows_are_isolated() {
        let (_, mem) = store();
        mem.set_stm(&win("win-a"), "a");
        mem.set_stm(&win("win-b"), "b");
        assert_eq!(mem.stm(&win("win-a")), "a");
        assert_eq!(mem.stm(&win("win-b")), "b");
        assert_eq!(mem.known_windows(), vec![win("win-a"), win("win-b")]);
    }

    #[test]
    fn reset_keeps_overrides_and_limit() {
        let (_, mem) = store();
        let w = win("win-a");
        mem.set_raw_cache_limit(&w, 4);
        mem.set_overrides(
            &w,
            OverridesPatch {
                name: Some("Ayu".into()),
                ..Default::default()
            },
        );
        mem.set_stm(&w, "x");
        mem.push_raw_reply(&w, "r");
        mem.reset(&w);
        let s = mem.snapshot(&w);
        assert_eq!(s.stm, "");
        assert!(s.raw_cache.is_empty());
        assert!(s.is_first_turn);
        assert_eq!(s.raw_cache_limit, 4);
        assert_eq!(s.identity_override.name, "Ayu");
    }

    #[test]
    fn persistence_failures_are_swallowed() {
        let mem = WindowMemoryStore::new(Arc::new(BrokenStore));
        let w = win("win-a");
        mem.set_stm(&w, "still here");
        mem.push_raw_reply(&w, "r");
        assert_eq!(mem.stm(&w), "still here");
        assert_eq!(mem.raw_replies(&w, None), vec!["r"]);
        assert_eq!(mem.known_windows(), vec![w]);
    }

    #[test]
    fn corrupted_record_starts_fresh() {
        let kv = Arc::new(InMemoryStore::new());
        kv.set("ringtale:win-a:memory", "{broken").unwrap();
        let mem = WindowMemoryStore::new(kv).with_default_raw_limit(5);
        let s = mem.snapshot(&win("win-a"));
        assert_eq!(s, WindowMemoryState::fresh(5));
    }
}
