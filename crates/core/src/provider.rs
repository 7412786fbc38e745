//! Provider trait: the adapter abstraction over text-generation backends.
//!
//! A Provider takes a prompt (or a message list) and returns best-effort
//! text. Adapters normalize their backend's response shape into
//! [`ProviderResponse`], so callers never see wire formats.
//!
//! Implementations: local inference endpoint, OpenAI-style chat completions,
//! Anthropic-style messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{self, Message};
use crate::window::WindowId;

/// The turn shape a request belongs to. Selects `{provider, model}` from the
/// routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Narrator turns.
    Story,
    /// World-driver decisions and matcher notes.
    Utility,
    /// Memory summarization.
    System,
    /// Card setup assistant.
    Setup,
    /// Window initializer.
    Initializer,
}

impl TurnRole {
    pub const ALL: [TurnRole; 5] = [
        TurnRole::Story,
        TurnRole::Utility,
        TurnRole::System,
        TurnRole::Setup,
        TurnRole::Initializer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Story => "story",
            TurnRole::Utility => "utility",
            TurnRole::System => "system",
            TurnRole::Setup => "setup",
            TurnRole::Initializer => "initializer",
        }
    }
}

/// Output-shape contract for a narrator reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Plain story text.
    #[default]
    Story,
    /// A simulated instant message.
    Wechat,
    /// A simulated voice call.
    Call,
    /// A simulated social post.
    Moment,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Story => "story",
            Channel::Wechat => "wechat",
            Channel::Call => "call",
            Channel::Moment => "moment",
        }
    }
}

/// Identity stamped onto every dispatched request and echoed on the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStamp {
    pub window_id: WindowId,
    #[serde(default)]
    pub character_id: String,
    pub request_id: String,
    pub role: TurnRole,
    #[serde(default)]
    pub channel: Channel,
}

impl RequestStamp {
    /// Whether an echoed stamp belongs to this request.
    pub fn matches(&self, echoed: &RequestStamp) -> bool {
        self.window_id == echoed.window_id && self.request_id == echoed.request_id
    }
}

/// What a request carries: one prompt, or a message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptInput {
    Prompt(String),
    Messages(Vec<Message>),
}

impl PromptInput {
    /// Render as a single prompt string.
    pub fn as_prompt(&self) -> String {
        match self {
            PromptInput::Prompt(p) => p.clone(),
            PromptInput::Messages(m) => message::flatten(m),
        }
    }

    /// Render as a message list (a lone prompt becomes one user message).
    pub fn as_messages(&self) -> Vec<Message> {
        match self {
            PromptInput::Prompt(p) => vec![Message::user(p.clone())],
            PromptInput::Messages(m) => m.clone(),
        }
    }
}

/// A request to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// Prompt or messages
    pub input: PromptInput,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Scope stamp for this request
    pub stamp: RequestStamp,
}

fn default_temperature() -> f32 {
    0.8
}

/// A normalized backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Best-effort generated text
    pub text: String,

    /// The raw response body, kept for diagnostics
    #[serde(default)]
    pub raw_body: String,

    /// The parsed response body
    #[serde(default)]
    pub parsed: serde_json::Value,

    /// The stamp the backend echoed back, if its shape carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<RequestStamp>,

    /// Set when the backend itself refused to produce content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl ProviderResponse {
    /// A plain text response with no echo and no raw body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw_body: String::new(),
            parsed: serde_json::Value::Null,
            echo: None,
            blocked_reason: None,
            model: String::new(),
        }
    }
}

/// User routing overrides, persisted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOverrides {
    /// Replaces the provider for every role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Replaces the narrator (story role) model only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_model: Option<String>,
}

/// The core Provider trait.
///
/// Every backend shape implements this. Callers dispatch through the
/// orchestrator without knowing which adapter answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "local", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(window: &str, request: &str) -> RequestStamp {
        RequestStamp {
            window_id: WindowId::sanitize(window),
            character_id: "c1".into(),
            request_id: request.into(),
            role: TurnRole::Story,
            channel: Channel::Story,
        }
    }

    #[test]
    fn stamp_match_requires_window_and_request() {
        let a = stamp("win-a", "r1");
        assert!(a.matches(&stamp("win-a", "r1")));
        assert!(!a.matches(&stamp("win-b", "r1")));
        assert!(!a.matches(&stamp("win-a", "r2")));
    }

    #[test]
    fn prompt_input_conversions() {
        let p = PromptInput::Prompt("hello".into());
        assert_eq!(p.as_messages().len(), 1);
        let m = PromptInput::Messages(vec![Message::system("s"), Message::user("u")]);
        assert!(m.as_prompt().contains("### system"));
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&TurnRole::Initializer).unwrap();
        assert_eq!(json, "\"initializer\"");
        assert_eq!(Channel::Moment.as_str(), "moment");
    }
}
