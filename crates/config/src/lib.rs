//! Configuration loading, validation, and management for Ringtale.
//!
//! Loads configuration from `~/.ringtale/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ringtale_core::{Language, TurnRole};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Largest raw-reply cache a window may keep.
pub const MAX_RAW_CACHE_LIMIT: usize = 20;

/// The root configuration structure.
///
/// Maps directly to `~/.ringtale/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key shared by remote providers without their own key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Language every window is locked to
    #[serde(default)]
    pub language: Language,

    /// Second language checked for refusal phrasing
    #[serde(default = "default_fallback_language")]
    pub fallback_language: Language,

    /// Provider used by roles that do not name one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when neither the role nor the provider names one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Named backend endpoints
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Role → provider/model routing table
    #[serde(default)]
    pub roles: RoleTable,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    /// Global rule sources (bottom layers of the rule stacks)
    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,
}

fn default_fallback_language() -> Language {
    Language::En
}
fn default_provider() -> String {
    "local".into()
}
fn default_model() -> String {
    "qwen2.5:7b-instruct".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("language", &self.language)
            .field("fallback_language", &self.fallback_language)
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("providers", &self.providers)
            .field("roles", &self.roles)
            .field("memory", &self.memory)
            .field("generation", &self.generation)
            .field("rules", &self.rules)
            .field("validator", &self.validator)
            .finish()
    }
}

/// Adapter shape a provider speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local inference endpoint: prompt in, structured fields out.
    #[default]
    Local,
    /// Chat-completions shape.
    Openai,
    /// Messages shape.
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// One row of the routing table. Empty fields inherit the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleTable {
    #[serde(default)]
    pub story: RoleRoute,
    #[serde(default)]
    pub utility: RoleRoute,
    #[serde(default)]
    pub system: RoleRoute,
    #[serde(default)]
    pub setup: RoleRoute,
    #[serde(default)]
    pub initializer: RoleRoute,
}

impl RoleTable {
    pub fn get(&self, role: TurnRole) -> &RoleRoute {
        match role {
            TurnRole::Story => &self.story,
            TurnRole::Utility => &self.utility,
            TurnRole::System => &self.system,
            TurnRole::Setup => &self.setup,
            TurnRole::Initializer => &self.initializer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Store file; defaults to `~/.ringtale/store.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Raw replies kept per window (1..=20)
    #[serde(default = "default_raw_cache_limit")]
    pub raw_cache_limit: usize,

    /// User inputs fed to STM regeneration
    #[serde(default = "default_stm_user_inputs")]
    pub stm_user_inputs: usize,

    /// STM length (in characters) that triggers LTM consolidation
    #[serde(default = "default_ltm_threshold")]
    pub ltm_threshold: usize,

    #[serde(default = "default_pending_event_cap")]
    pub pending_event_cap: usize,
}

fn default_memory_backend() -> String {
    "file".into()
}
fn default_raw_cache_limit() -> usize {
    6
}
fn default_stm_user_inputs() -> usize {
    4
}
fn default_ltm_threshold() -> usize {
    1500
}
fn default_pending_event_cap() -> usize {
    100
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            raw_cache_limit: default_raw_cache_limit(),
            stm_user_inputs: default_stm_user_inputs(),
            ltm_threshold: default_ltm_threshold(),
            pending_event_cap: default_pending_event_cap(),
        }
    }
}

impl MemoryConfig {
    /// Resolved store path.
    pub fn store_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => AppConfig::config_dir().join("store.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Deadline for a single backend dispatch
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.8
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub system_rules: String,

    #[serde(default)]
    pub user_persona: String,

    /// Appended to the global system rules as a trait list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_traits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Text surfaced in place of a rejected reply
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// Extra pattern rules appended to the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleConfig>,
}

fn default_placeholder() -> String {
    "（信号不好，对方似乎没有回应……）".into()
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            rules: vec![],
        }
    }
}

/// A configured validator rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,

    /// Regular expression, matched case-insensitively
    pub pattern: String,

    /// "prompt_leak", "refusal" or "meta_narration"
    pub reason: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from the default path (~/.ringtale/config.toml).
    ///
    /// Environment overrides:
    /// - `RINGTALE_API_KEY` (when the file sets none)
    /// - `RINGTALE_PROVIDER`
    /// - `RINGTALE_STORY_MODEL`
    /// - `RINGTALE_LANGUAGE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("RINGTALE_API_KEY").ok();
        }

        if let Ok(provider) = std::env::var("RINGTALE_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("RINGTALE_STORY_MODEL") {
            config.roles.story.model = Some(model);
        }

        if let Ok(code) = std::env::var("RINGTALE_LANGUAGE") {
            match Language::parse(&code) {
                Some(language) => config.language = language,
                None => tracing::warn!(code = %code, "Ignoring unknown RINGTALE_LANGUAGE"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ringtale")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.memory.raw_cache_limit == 0 || self.memory.raw_cache_limit > MAX_RAW_CACHE_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "memory.raw_cache_limit must be between 1 and {MAX_RAW_CACHE_LIMIT}"
            )));
        }

        if self.memory.ltm_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "memory.ltm_threshold must be > 0".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory.backend '{}' (expected \"file\" or \"memory\")",
                self.memory.backend
            )));
        }

        if self.generation.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generation.request_timeout_secs must be > 0".into(),
            ));
        }

        for role in TurnRole::ALL {
            if let Some(name) = &self.roles.get(role).provider
                && name != &self.default_provider
                && !self.providers.contains_key(name)
            {
                return Err(ConfigError::ValidationError(format!(
                    "roles.{} references unknown provider '{name}'",
                    role.as_str()
                )));
            }
        }

        for rule in &self.validator.rules {
            if !matches!(
                rule.reason.as_str(),
                "prompt_leak" | "refusal" | "meta_narration"
            ) {
                return Err(ConfigError::ValidationError(format!(
                    "validator rule '{}' has unknown reason '{}'",
                    rule.name, rule.reason
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Provider name and model for a role, before user overrides.
    pub fn route(&self, role: TurnRole) -> (String, String) {
        let row = self.roles.get(role);
        let provider = row
            .provider
            .clone()
            .unwrap_or_else(|| self.default_provider.clone());
        let model = row
            .model
            .clone()
            .or_else(|| {
                self.providers
                    .get(&provider)
                    .and_then(|p| p.default_model.clone())
            })
            .unwrap_or_else(|| self.default_model.clone());
        (provider, model)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.providers.insert(
            "local".into(),
            ProviderConfig {
                kind: ProviderKind::Local,
                api_url: Some("http://localhost:8080".into()),
                ..Default::default()
            },
        );
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            language: Language::default(),
            fallback_language: default_fallback_language(),
            default_provider: default_provider(),
            default_model: default_model(),
            providers: HashMap::new(),
            roles: RoleTable::default(),
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
            rules: RulesConfig::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
