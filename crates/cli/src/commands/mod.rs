pub mod card;
pub mod chat;
pub mod memory;
pub mod onboard;
pub mod status;

use ringtale_config::AppConfig;
use ringtale_core::event::EventBus;
use ringtale_core::window::WindowContext;
use ringtale_memory::{CardRegistry, InMemoryWorld, SettingsStore, WindowMemoryStore};
use ringtale_narrative::{
    AiOrchestrator, EngineDeps, EngineSettings, GlobalRules, NarrativeEngine, validator_from_config,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub(crate) type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Config plus the persisted stores every command works against.
pub(crate) struct Runtime {
    pub config: AppConfig,
    pub memory: Arc<WindowMemoryStore>,
    pub cards: Arc<CardRegistry>,
    pub settings: Arc<SettingsStore>,
    /// Threads, moments and the story log, persisted next to memory.
    pub world: Arc<InMemoryWorld>,
}

impl Runtime {
    pub fn open() -> CmdResult<Self> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        let store = ringtale_memory::open_store(&config.memory.backend, config.memory.store_path());
        let memory = Arc::new(
            WindowMemoryStore::new(store.clone())
                .with_default_raw_limit(config.memory.raw_cache_limit)
                .with_pending_cap(config.memory.pending_event_cap),
        );
        Ok(Self {
            cards: Arc::new(CardRegistry::new(store.clone())),
            world: Arc::new(InMemoryWorld::persistent(store.clone())),
            settings: Arc::new(SettingsStore::new(store)),
            config,
            memory,
        })
    }

    /// Assemble a narrative engine bound to `window`.
    pub fn engine(&self, window: &str, world_driver: bool) -> CmdResult<NarrativeEngine> {
        let events = Arc::new(EventBus::default());
        let router = ringtale_providers::router::build_from_config(&self.config);
        let orchestrator = AiOrchestrator::new(router, self.memory.clone(), events.clone())
            .with_settings(self.settings.clone())
            .with_temperature(self.config.generation.temperature)
            .with_max_tokens(self.config.generation.max_tokens)
            .with_timeout(Duration::from_secs(self.config.generation.request_timeout_secs));
        let validator = validator_from_config(&self.config).map_err(|e| format!("Invalid validator rules: {e}"))?;

        let mut settings = EngineSettings::from_config(&self.config);
        settings.world_driver = world_driver;
        debug!(window, world_driver, rules = validator.active_count(), "Narrative engine assembled");

        Ok(NarrativeEngine::new(
            WindowContext::new(window),
            EngineDeps {
                memory: self.memory.clone(),
                characters: self.cards.clone(),
                world: self.world.clone(),
                orchestrator: Arc::new(orchestrator),
                validator: Arc::new(validator),
                events,
                rules: GlobalRules::from(&self.config.rules),
            },
            settings,
        ))
    }
}
