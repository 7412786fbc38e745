//! Provider router: selects provider and model per turn role.
//!
//! Routing is a table: each [`TurnRole`] maps to a provider name and a model.
//! Persisted user overrides are applied on top at resolve time, so changing
//! the active provider never requires rebuilding the router.

use crate::anthropic::AnthropicProvider;
use crate::local::LocalProvider;
use crate::openai_compat::OpenAiCompatProvider;
use ringtale_config::{AppConfig, ProviderKind};
use ringtale_core::error::ProviderError;
use ringtale_core::provider::{Provider, RouteOverrides, TurnRole};
use std::collections::HashMap;
use std::sync::Arc;

/// A provider/model pair chosen for one dispatch.
#[derive(Clone)]
pub struct ResolvedRoute {
    pub provider_name: String,
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

impl std::fmt::Debug for ResolvedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedRoute")
            .field("provider", &self.provider_name)
            .field("model", &self.model)
            .finish()
    }
}

/// Routes turn roles to registered providers.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Model used when a provider is selected by override
    provider_models: HashMap<String, String>,
    routes: HashMap<TurnRole, (String, String)>,
    default_provider: String,
    default_model: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider and model.
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            provider_models: HashMap::new(),
            routes: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
        }
    }

    /// A router that sends every role to one provider.
    pub fn single(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let name = provider.name().to_string();
        let mut router = Self::new(name.clone(), model);
        router.register(name, provider);
        router
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Set the model a provider uses when no route names one.
    pub fn set_provider_model(&mut self, name: impl Into<String>, model: impl Into<String>) {
        self.provider_models.insert(name.into(), model.into());
    }

    /// Pin a role to a provider and model.
    pub fn set_route(
        &mut self,
        role: TurnRole,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) {
        self.routes.insert(role, (provider.into(), model.into()));
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve the provider and model for a role.
    ///
    /// A provider override that names an unregistered provider is ignored.
    /// The story-model override applies to [`TurnRole::Story`] only.
    pub fn resolve(
        &self,
        role: TurnRole,
        overrides: &RouteOverrides,
    ) -> Result<ResolvedRoute, ProviderError> {
        let (mut provider_name, mut model) = self.routes.get(&role).cloned().unwrap_or_else(|| {
            (
                self.default_provider.clone(),
                self.model_for(&self.default_provider),
            )
        });

        if let Some(name) = &overrides.provider {
            if self.providers.contains_key(name) {
                if name != &provider_name {
                    model = self.model_for(name);
                }
                provider_name = name.clone();
            } else {
                tracing::warn!(provider = %name, "Provider override names an unknown provider");
            }
        }

        if role == TurnRole::Story
            && let Some(story_model) = &overrides.story_model
            && !story_model.trim().is_empty()
        {
            model = story_model.trim().to_string();
        }

        let provider = self
            .get(&provider_name)
            .ok_or_else(|| ProviderError::NotConfigured(provider_name.clone()))?;

        Ok(ResolvedRoute {
            provider_name,
            provider,
            model,
        })
    }

    fn model_for(&self, provider: &str) -> String {
        self.provider_models
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build the adapter for one configured provider. Selection is by kind only.
///
/// A chat-completions provider needs an `api_url` unless its name is one of
/// the well-known services.
fn build_adapter(
    name: &str,
    kind: ProviderKind,
    api_url: Option<&str>,
    api_key: &str,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match kind {
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new(name, api_url))),
        ProviderKind::Openai => {
            let base_url = api_url
                .or_else(|| default_base_url(name))
                .ok_or_else(|| ProviderError::NotConfigured(format!("{name}: no api_url configured")))?;
            Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
        }
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(api_key).with_name(name);
            if let Some(url) = api_url {
                p = p.with_base_url(url);
            }
            Ok(Arc::new(p))
        }
    }
}

fn register_adapter(
    router: &mut ProviderRouter,
    name: &str,
    adapter: Result<Arc<dyn Provider>, ProviderError>,
) {
    match adapter {
        Ok(provider) => router.register(name, provider),
        // Routes naming it resolve to NotConfigured at dispatch time.
        Err(e) => tracing::warn!(provider = %name, error = %e, "Provider skipped"),
    }
}

/// Build providers and the routing table from configuration.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider, &config.default_model);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let adapter = build_adapter(
            name,
            provider_config.kind,
            provider_config.api_url.as_deref(),
            &api_key,
        );
        register_adapter(&mut router, name, adapter);

        if let Some(model) = &provider_config.default_model {
            router.set_provider_model(name.clone(), model.clone());
        }
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let kind = guess_kind(&config.default_provider);
        let api_key = config.api_key.clone().unwrap_or_default();
        let adapter = build_adapter(&config.default_provider, kind, None, &api_key);
        register_adapter(&mut router, &config.default_provider, adapter);
    }

    for role in TurnRole::ALL {
        let (provider, model) = config.route(role);
        router.set_route(role, provider, model);
    }

    router
}

/// Kind for a provider that is referenced by name but not configured.
fn guess_kind(name: &str) -> ProviderKind {
    match name {
        "anthropic" | "claude" => ProviderKind::Anthropic,
        "local" | "ollama" => ProviderKind::Local,
        _ => ProviderKind::Openai,
    }
}

/// Get the default base URL for well-known chat-completion providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "llamacpp" | "llama.cpp" => Some("http://localhost:8080/v1"),
        _ => None,
    }
}
