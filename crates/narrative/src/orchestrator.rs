//! AI orchestration: one logical turn → one backend dispatch.
//!
//! The orchestrator resolves `{provider, model}` for the turn's role, stamps
//! the request with its scope, enforces the per-request deadline and
//! normalizes every failure to empty text. It never returns an error to the
//! caller; `GenerateResponse::error` carries the diagnosis instead.

use chrono::Utc;
use ringtale_core::event::{DomainEvent, EventBus};
use ringtale_core::provider::{Channel, PromptInput, ProviderRequest, RequestStamp, TurnRole};
use ringtale_core::window::WindowId;
use ringtale_memory::{SettingsStore, WindowMemoryStore};
use ringtale_providers::ProviderRouter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default deadline for one dispatch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One logical turn to dispatch.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub window_id: WindowId,
    pub character_id: String,
    pub role: TurnRole,
    pub input: PromptInput,
    pub request_id: String,
    pub channel: Channel,
    /// Free-form caller data, logged with the dispatch.
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(window_id: WindowId, role: TurnRole, input: PromptInput) -> Self {
        Self {
            window_id,
            character_id: String::new(),
            role,
            input,
            request_id: uuid::Uuid::new_v4().to_string(),
            channel: Channel::Story,
            meta: serde_json::Map::new(),
        }
    }

    pub fn with_character(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = character_id.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    fn stamp(&self) -> RequestStamp {
        RequestStamp {
            window_id: self.window_id.clone(),
            character_id: self.character_id.clone(),
            request_id: self.request_id.clone(),
            role: self.role,
            channel: self.channel,
        }
    }
}

/// The normalized outcome of a dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    /// The window the response belongs to, taken from the backend's echo
    /// when it sends one.
    pub window_id: WindowId,
    pub character_id: String,
    pub request_id: String,
    pub raw_response: String,
    pub error: Option<String>,
    /// Other known windows whose ids appear in the text.
    pub leaked_windows: Vec<String>,
    pub provider: String,
    pub model: String,
}

impl GenerateResponse {
    fn empty(request: &GenerateRequest) -> Self {
        Self {
            window_id: request.window_id.clone(),
            character_id: request.character_id.clone(),
            request_id: request.request_id.clone(),
            ..Self::default()
        }
    }

    /// Whether this response is scoped to `request`.
    pub fn belongs_to(&self, request: &GenerateRequest) -> bool {
        self.window_id == request.window_id && self.request_id == request.request_id
    }

    /// Non-empty text that was not blocked.
    pub fn usable_text(&self) -> Option<&str> {
        let t = self.text.trim();
        (!self.blocked && !t.is_empty()).then_some(t)
    }
}

/// Dispatches turns through the provider router.
pub struct AiOrchestrator {
    router: ProviderRouter,
    memory: Arc<WindowMemoryStore>,
    settings: Option<Arc<SettingsStore>>,
    events: Arc<EventBus>,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl AiOrchestrator {
    pub fn new(router: ProviderRouter, memory: Arc<WindowMemoryStore>, events: Arc<EventBus>) -> Self {
        Self {
            router,
            memory,
            settings: None,
            events,
            temperature: 0.8,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read persisted routing overrides from `settings` on every dispatch.
    pub fn with_settings(mut self, settings: Arc<SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Dispatch one turn. Never fails: transport errors, timeouts and stale
    /// echoes all resolve to empty text.
    pub async fn generate(&self, request: GenerateRequest) -> GenerateResponse {
        let mut response = GenerateResponse::empty(&request);

        let overrides = self
            .settings
            .as_ref()
            .map(|s| s.route_overrides())
            .unwrap_or_default();
        let route = match self.router.resolve(request.role, &overrides) {
            Ok(route) => route,
            Err(e) => {
                warn!(role = request.role.as_str(), error = %e, "No provider for role");
                response.error = Some(e.to_string());
                return response;
            }
        };
        response.provider = route.provider_name.clone();
        response.model = route.model.clone();

        debug!(
            window = %request.window_id,
            request_id = %request.request_id,
            role = request.role.as_str(),
            provider = %route.provider_name,
            model = %route.model,
            meta = ?request.meta,
            "Dispatching turn"
        );

        let stamp = request.stamp();
        let provider_request = ProviderRequest {
            model: route.model.clone(),
            input: request.input.clone(),
            temperature: self.temperature_for(request.role),
            max_tokens: self.max_tokens,
            stamp: stamp.clone(),
        };

        let result = tokio::time::timeout(self.timeout, route.provider.complete(provider_request)).await;
        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(window = %request.window_id, request_id = %request.request_id, error = %e, "Dispatch failed");
                response.error = Some(e.to_string());
                return response;
            }
            Err(_) => {
                warn!(
                    window = %request.window_id,
                    request_id = %request.request_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Dispatch timed out"
                );
                response.error = Some(format!("timed out after {}s", self.timeout.as_secs()));
                return response;
            }
        };

        response.raw_response = reply.raw_body;
        if !reply.model.is_empty() {
            response.model = reply.model;
        }

        if let Some(echo) = &reply.echo {
            response.window_id = echo.window_id.clone();
            response.request_id = echo.request_id.clone();
            if !stamp.matches(echo) {
                warn!(
                    window = %request.window_id,
                    request_id = %request.request_id,
                    echoed_window = %echo.window_id,
                    echoed_request = %echo.request_id,
                    "Discarding response with a foreign stamp"
                );
                response.error = Some("response stamp does not match request".into());
                return response;
            }
        }

        if let Some(reason) = reply.blocked_reason {
            debug!(request_id = %request.request_id, reason = %reason, "Backend blocked output");
            response.blocked = true;
            response.blocked_reason = Some(reason);
        }

        response.text = reply.text;
        response.leaked_windows = self.scan_for_leaks(&request, &response.text);
        response
    }

    fn temperature_for(&self, role: TurnRole) -> f32 {
        match role {
            TurnRole::Utility | TurnRole::System => self.temperature.min(0.3),
            _ => self.temperature,
        }
    }

    /// Cross-window leakage: logged and published, never blocking.
    fn scan_for_leaks(&self, request: &GenerateRequest, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let leaked: Vec<String> = self
            .memory
            .known_windows()
            .into_iter()
            .filter(|w| w != &request.window_id)
            .filter(|w| mentions_id(text, w.as_str()))
            .map(|w| w.to_string())
            .collect();

        if !leaked.is_empty() {
            warn!(
                window = %request.window_id,
                request_id = %request.request_id,
                leaked = ?leaked,
                "Response mentions other windows"
            );
            self.events.publish(DomainEvent::CrossWindowLeak {
                window_id: request.window_id.to_string(),
                request_id: request.request_id.clone(),
                leaked: leaked.clone(),
                timestamp: Utc::now(),
            });
        }
        leaked
    }
}

/// Whether `id` occurs in `text` as a whole token.
fn mentions_id(text: &str, id: &str) -> bool {
    let is_id_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    text.match_indices(id).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + id.len()..].chars().next();
        !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
    })
}
