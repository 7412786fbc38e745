//! World state: message threads, moments and the story log.
//!
//! The phone UI owns the real world state; this implementation backs the
//! CLI and tests. Built with [`InMemoryWorld::persistent`], each window's
//! record is loaded on first use and written through to the store as
//! `ringtale:{window}:world`, so the story log survives a restart.

use ringtale_core::memory::KeyValueStore;
use ringtale_core::window::WindowId;
use ringtale_core::world::{MomentRef, WorldState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Key suffix for world records.
pub const WORLD_KEY: &str = "world";

/// Story entries kept per window. STM regeneration only reads the tail.
pub const MAX_STORY_ENTRIES: usize = 200;

/// One completed narrator turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryEntry {
    pub user_input: String,
    pub reply: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WindowWorld {
    threads: BTreeSet<String>,
    moments: BTreeMap<String, MomentRef>,
    story: Vec<StoryEntry>,
}

#[derive(Default)]
pub struct InMemoryWorld {
    windows: RwLock<HashMap<WindowId, WindowWorld>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world whose records are written through to `store`.
    pub fn persistent(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            windows: RwLock::default(),
            store: Some(store),
        }
    }

    fn load(store: &dyn KeyValueStore, window: &WindowId) -> WindowWorld {
        match store.get(&window.scoped_key(WORLD_KEY)) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(window = %window, error = %e, "Corrupted world record, starting fresh");
                WindowWorld::default()
            }),
            Ok(None) => WindowWorld::default(),
            Err(e) => {
                warn!(window = %window, error = %e, "World read failed, starting fresh");
                WindowWorld::default()
            }
        }
    }

    /// Pull the window's persisted record into the cache.
    fn ensure_loaded(&self, window: &WindowId) {
        let Some(store) = &self.store else {
            return;
        };
        if self
            .windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(window)
        {
            return;
        }
        let record = Self::load(store.as_ref(), window);
        self.windows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(window.clone())
            .or_insert(record);
    }

    fn read<R>(&self, window: &WindowId, f: impl FnOnce(Option<&WindowWorld>) -> R) -> R {
        self.ensure_loaded(window);
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        f(windows.get(window))
    }

    /// Run `f` on the window's record, then write it through.
    fn with_window<R>(&self, window: &WindowId, f: impl FnOnce(&mut WindowWorld) -> R) -> R {
        self.ensure_loaded(window);
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        let record = windows.entry(window.clone()).or_default();
        let out = f(&mut *record);
        if let Some(store) = &self.store {
            let result = serde_json::to_string(&*record)
                .map_err(|e| e.to_string())
                .and_then(|json| {
                    store
                        .set(&window.scoped_key(WORLD_KEY), &json)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = result {
                warn!(window = %window, error = %e, "Failed to persist world state");
            }
        }
        out
    }

    pub fn add_thread(&self, window: &WindowId, thread_id: &str) {
        self.with_window(window, |w| {
            w.threads.insert(thread_id.to_string());
        });
    }

    pub fn add_moment(&self, window: &WindowId, moment_id: &str, author: &str) {
        self.with_window(window, |w| {
            w.moments.insert(
                moment_id.to_string(),
                MomentRef {
                    id: moment_id.to_string(),
                    author: author.to_string(),
                    deleted: false,
                },
            );
        });
    }

    /// Mark a moment deleted. It stays known, so lookups can tell deleted
    /// from missing.
    pub fn delete_moment(&self, window: &WindowId, moment_id: &str) -> bool {
        self.with_window(window, |w| match w.moments.get_mut(moment_id) {
            Some(m) => {
                m.deleted = true;
                true
            }
            None => false,
        })
    }

    pub fn story_log(&self, window: &WindowId) -> Vec<StoryEntry> {
        self.read(window, |w| w.map(|w| w.story.clone()).unwrap_or_default())
    }
}

impl WorldState for InMemoryWorld {
    fn thread_exists(&self, window: &WindowId, thread_id: &str) -> bool {
        self.read(window, |w| w.is_some_and(|w| w.threads.contains(thread_id)))
    }

    fn threads(&self, window: &WindowId) -> Vec<String> {
        self.read(window, |w| {
            w.map(|w| w.threads.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn moment(&self, window: &WindowId, moment_id: &str) -> Option<MomentRef> {
        self.read(window, |w| w?.moments.get(moment_id).cloned())
    }

    fn live_moments(&self, window: &WindowId) -> Vec<MomentRef> {
        self.read(window, |w| {
            w.map(|w| w.moments.values().filter(|m| !m.deleted).cloned().collect())
                .unwrap_or_default()
        })
    }

    fn recent_user_inputs(&self, window: &WindowId, limit: usize) -> Vec<String> {
        self.read(window, |w| {
            let Some(w) = w else {
                return Vec::new();
            };
            let inputs: Vec<String> = w
                .story
                .iter()
                .map(|e| e.user_input.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let start = inputs.len().saturating_sub(limit);
            inputs[start..].to_vec()
        })
    }

    fn record_turn(&self, window: &WindowId, user_input: &str, reply: &str) {
        self.with_window(window, |w| {
            w.story.push(StoryEntry {
                user_input: user_input.to_string(),
                reply: reply.to_string(),
            });
            if w.story.len() > MAX_STORY_ENTRIES {
                let excess = w.story.len() - MAX_STORY_ENTRIES;
                w.story.drain(..excess);
            }
        });
    }
}
