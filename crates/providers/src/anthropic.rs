//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Shape differences handled here:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field, consecutive system messages joined
//! - `max_tokens` is mandatory
//! - a `refusal` stop reason marks the response as blocked

use async_trait::async_trait;
use ringtale_core::error::ProviderError;
use ringtale_core::message::{Message, Role};
use ringtale_core::provider::{ProviderRequest, ProviderResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Rename the provider (the routing table refers to providers by name).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, non_system)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let messages = request.input.as_messages();
        let (system, rest) = Self::extract_system(&messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&rest),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature.min(1.0),
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        body
    }

    /// Convert an Anthropic API response body to our ProviderResponse.
    fn parse_body(raw_body: String) -> Result<ProviderResponse, ProviderError> {
        let parsed: serde_json::Value = serde_json::from_str(&raw_body).map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;
        let resp: AnthropicResponse = serde_json::from_value(parsed.clone())
            .map_err(|e| ProviderError::MalformedResponse(format!("Unexpected shape: {e}")))?;

        let text = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let blocked_reason = match resp.stop_reason.as_deref() {
            Some("refusal") => Some("refusal".to_string()),
            _ => None,
        };

        Ok(ProviderResponse {
            text,
            raw_body,
            parsed,
            echo: None,
            blocked_reason,
            model: resp.model,
        })
    }
}

#[async_trait]
impl ringtale_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            request_id = %request.stamp.request_id,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let raw_body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Self::parse_body(raw_body)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_core::{Channel, PromptInput, Provider, RequestStamp, TurnRole, WindowId};

    fn request(messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4".into(),
            input: PromptInput::Messages(messages),
            temperature: 1.4,
            max_tokens: None,
            stamp: RequestStamp {
                window_id: WindowId::sanitize("win-a"),
                character_id: "c1".into(),
                request_id: "r-1".into(),
                role: TurnRole::Story,
                channel: Channel::Story,
            },
        }
    }

    #[test]
    fn constructor_with_name_and_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .with_name("claude")
            .with_base_url("http://localhost:9999/");
        assert_eq!(provider.name(), "claude");
        assert_eq!(provider.base_url, "http://localhost:9999");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            Message::system("Rules."),
            Message::system("Persona."),
            Message::user("Hi"),
        ];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("Rules.\n\nPersona."));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn system_extraction_no_system() {
        let messages = vec![Message::user("Hi")];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn body_has_defaults_and_clamped_temperature() {
        let body = AnthropicProvider::build_body(&request(vec![
            Message::system("Rules."),
            Message::user("Hi"),
            Message::assistant("Hello."),
        ]));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["system"], "Rules.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][1]["role"], "assistant");
    }

    #[test]
    fn parse_text_response() {
        let raw = r#"{"id":"msg_1","model":"claude-sonnet-4","type":"message",
            "content":[{"type":"text","text":"灯灭了。"}],"stop_reason":"end_turn",
            "usage":{"input_tokens":10,"output_tokens":5}}"#;
        let resp = AnthropicProvider::parse_body(raw.into()).unwrap();
        assert_eq!(resp.text, "灯灭了。");
        assert_eq!(resp.model, "claude-sonnet-4");
        assert!(resp.blocked_reason.is_none());
    }

    #[test]
    fn parse_skips_unknown_blocks() {
        let raw = r#"{"model":"m","content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"A"}]}"#;
        let resp = AnthropicProvider::parse_body(raw.into()).unwrap();
        assert_eq!(resp.text, "A");
    }

    #[test]
    fn parse_refusal_stop_reason() {
        let raw = r#"{"model":"m","content":[],"stop_reason":"refusal"}"#;
        let resp = AnthropicProvider::parse_body(raw.into()).unwrap();
        assert_eq!(resp.text, "");
        assert_eq!(resp.blocked_reason.as_deref(), Some("refusal"));
    }
}
