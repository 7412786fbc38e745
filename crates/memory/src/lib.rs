//! Persistence and per-window state for Ringtale.
//!
//! - [`store`]: key-value backends (`FileStore`, `InMemoryStore`)
//! - [`window_memory`]: the per-window memory record behind a read-through cache
//! - [`queue`]: per-window serial job queue used by consolidation
//! - [`settings`], [`cards`], [`world`]: routing overrides, card bindings,
//!   and a reference world state, optionally persisted

pub mod cards;
pub mod queue;
pub mod settings;
pub mod store;
pub mod window_memory;
pub mod world;

pub use cards::CardRegistry;
pub use queue::SerialQueue;
pub use settings::SettingsStore;
pub use store::{FileStore, InMemoryStore};
pub use window_memory::{
    FlagsPatch, IdentityOverride, OverridesPatch, PendingEvent, Person, RuleOverrides,
    WindowMemoryState, WindowMemoryStore, WindowOverrides,
};
pub use world::{InMemoryWorld, MAX_STORY_ENTRIES, StoryEntry, WORLD_KEY};

use ringtale_core::memory::KeyValueStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Open the configured backend: `"memory"` or a JSON file at `path`.
pub fn open_store(backend: &str, path: PathBuf) -> Arc<dyn KeyValueStore> {
    match backend {
        "memory" => Arc::new(InMemoryStore::new()),
        _ => Arc::new(FileStore::open(path)),
    }
}
