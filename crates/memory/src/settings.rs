//! Global routing overrides chosen by the user.
//!
//! These are not window-scoped: switching the provider or the narrator
//! model applies to every window. Stored under a key outside the window
//! namespace so window listing never picks it up.

use ringtale_core::memory::KeyValueStore;
use ringtale_core::provider::RouteOverrides;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

const ROUTING_KEY: &str = "ringtale.settings.routing";

pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    cached: RwLock<Option<RouteOverrides>>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    /// Current overrides (empty when nothing was ever set).
    pub fn route_overrides(&self) -> RouteOverrides {
        if let Some(cached) = self.cached.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return cached.clone();
        }
        let loaded = match self.store.get(ROUTING_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Corrupted routing settings, ignoring");
                RouteOverrides::default()
            }),
            Ok(None) => RouteOverrides::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read routing settings");
                RouteOverrides::default()
            }
        };
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(loaded.clone());
        loaded
    }

    /// Use `provider` for every role. `None` restores the routing table.
    pub fn set_provider_override(&self, provider: Option<&str>) {
        self.modify(|o| o.provider = normalize(provider));
    }

    /// Use `model` for narrator turns. `None` restores the routing table.
    pub fn set_story_model_override(&self, model: Option<&str>) {
        self.modify(|o| o.story_model = normalize(model));
    }

    fn modify(&self, f: impl FnOnce(&mut RouteOverrides)) {
        let mut overrides = self.route_overrides();
        f(&mut overrides);
        info!(
            provider = ?overrides.provider,
            story_model = ?overrides.story_model,
            "Routing overrides updated"
        );
        let result = serde_json::to_string(&overrides)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(ROUTING_KEY, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist routing settings");
        }
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(overrides);
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
