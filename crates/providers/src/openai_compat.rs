//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, vLLM, llama.cpp server, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! The chat-completions shape carries no request metadata, so responses from
//! this adapter never have an echoed stamp.

use async_trait::async_trait;
use ringtale_core::error::ProviderError;
use ringtale_core::message::Message;
use ringtale_core::provider::{ProviderRequest, ProviderResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible chat-completions provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.input.as_messages()),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    fn parse_body(raw_body: String) -> Result<ProviderResponse, ProviderError> {
        let parsed: serde_json::Value = serde_json::from_str(&raw_body)
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;
        let api_response: ApiResponse = serde_json::from_value(parsed.clone())
            .map_err(|e| ProviderError::MalformedResponse(format!("Unexpected shape: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let blocked_reason = match choice.finish_reason.as_deref() {
            Some("content_filter") => Some("content_filter".to_string()),
            _ => choice.message.refusal.filter(|r| !r.trim().is_empty()),
        };

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            raw_body,
            parsed,
            echo: None,
            blocked_reason,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl ringtale_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
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
            .header("Authorization", format!("Bearer {}", self.api_key))
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
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
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
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_core::{Channel, PromptInput, Provider, RequestStamp, TurnRole, WindowId};

    fn request(input: PromptInput) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o-mini".into(),
            input,
            temperature: 0.5,
            max_tokens: None,
            stamp: RequestStamp {
                window_id: WindowId::sanitize("win-a"),
                character_id: String::new(),
                request_id: "r-1".into(),
                role: TurnRole::Utility,
                channel: Channel::Story,
            },
        }
    }

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You narrate."), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn prompt_becomes_single_user_message() {
        let body = OpenAiCompatProvider::build_body(&request(PromptInput::Prompt("hi".into())));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn parse_text_response() {
        let raw = r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"窗外下着雨。"},"finish_reason":"stop"}]}"#;
        let resp = OpenAiCompatProvider::parse_body(raw.into()).unwrap();
        assert_eq!(resp.text, "窗外下着雨。");
        assert_eq!(resp.model, "gpt-4o-mini");
        assert!(resp.echo.is_none());
        assert!(resp.blocked_reason.is_none());
        assert_eq!(resp.parsed["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn parse_content_filter_is_blocked() {
        let raw = r#"{"model":"m","choices":[{"message":{"content":null},"finish_reason":"content_filter"}]}"#;
        let resp = OpenAiCompatProvider::parse_body(raw.into()).unwrap();
        assert_eq!(resp.text, "");
        assert_eq!(resp.blocked_reason.as_deref(), Some("content_filter"));
    }

    #[test]
    fn parse_refusal_field_is_blocked() {
        let raw = r#"{"model":"m","choices":[{"message":{"content":null,"refusal":"I can't help with that."},"finish_reason":"stop"}]}"#;
        let resp = OpenAiCompatProvider::parse_body(raw.into()).unwrap();
        assert!(resp.blocked_reason.unwrap().contains("can't"));
    }

    #[test]
    fn parse_empty_choices_is_malformed() {
        let err = OpenAiCompatProvider::parse_body(r#"{"model":"m","choices":[]}"#.into())
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
