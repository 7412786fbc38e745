//! Local inference provider: a prompt-in, structured-fields-out endpoint.
//!
//! Talks to an inference server running next to the client (an Ollama-style
//! `/api/generate` route or a small sidecar with the same shape). Unlike the
//! chat-completion shapes, this endpoint receives the request stamp as `meta`
//! and echoes it back, so the orchestrator can verify that the reply belongs
//! to the window and request that asked for it.
//!
//! Request body:
//! ```json
//! { "model": "...", "prompt": "...", "stream": false,
//!   "options": { "temperature": 0.8, "num_predict": 512 },
//!   "meta": { "window_id": "...", "request_id": "...", ... } }
//! ```
//!
//! Response fields read: `text` | `response` | `output`, optional `meta`,
//! optional `blocked` / `blocked_reason`.

use async_trait::async_trait;
use ringtale_core::error::ProviderError;
use ringtale_core::provider::{ProviderRequest, ProviderResponse, RequestStamp};
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Field names the endpoint may use for generated text, in lookup order.
const TEXT_FIELDS: [&str; 3] = ["text", "response", "output"];

pub struct LocalProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(request: &ProviderRequest) -> Value {
        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }
        serde_json::json!({
            "model": request.model,
            "prompt": request.input.as_prompt(),
            "stream": false,
            "options": options,
            "meta": request.stamp,
        })
    }

    /// Normalize a response body. Missing text is an empty string, not an error.
    fn parse_body(raw_body: String, model: &str) -> Result<ProviderResponse, ProviderError> {
        let parsed: Value = serde_json::from_str(&raw_body)
            .map_err(|e| ProviderError::MalformedResponse(format!("local endpoint: {e}")))?;

        let text = TEXT_FIELDS
            .iter()
            .find_map(|field| parsed.get(*field).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let echo = parsed
            .get("meta")
            .cloned()
            .and_then(|meta| serde_json::from_value::<RequestStamp>(meta).ok());

        let blocked_reason = match parsed.get("blocked_reason").and_then(Value::as_str) {
            Some(reason) if !reason.is_empty() => Some(reason.to_string()),
            _ if parsed.get("blocked").and_then(Value::as_bool) == Some(true) => {
                Some("blocked".to_string())
            }
            _ => None,
        };

        let model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string();

        Ok(ProviderResponse {
            text,
            raw_body,
            parsed,
            echo,
            blocked_reason,
            model,
        })
    }
}

#[async_trait]
impl ringtale_core::Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            window = %request.stamp.window_id,
            request_id = %request.stamp.request_id,
            "Sending local generate request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Local endpoint returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let raw_body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Self::parse_body(raw_body, &request.model)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_core::{Channel, PromptInput, Provider, TurnRole, WindowId};

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "qwen2.5:7b".into(),
            input: PromptInput::Prompt("Continue the story.".into()),
            temperature: 0.7,
            max_tokens: Some(256),
            stamp: RequestStamp {
                window_id: WindowId::sanitize("win-a"),
                character_id: "c1".into(),
                request_id: "r-1".into(),
                role: TurnRole::Story,
                channel: Channel::Call,
            },
        }
    }

    #[test]
    fn constructor_trims_base_url() {
        let provider = LocalProvider::new("local", Some("http://127.0.0.1:8080/"));
        assert_eq!(provider.name(), "local");
        assert_eq!(provider.base_url, "http://127.0.0.1:8080");
        assert_eq!(LocalProvider::new("l", None).base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn body_carries_prompt_options_and_meta() {
        let body = LocalProvider::build_body(&request());
        assert_eq!(body["prompt"], "Continue the story.");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["meta"]["window_id"], "win-a");
        assert_eq!(body["meta"]["request_id"], "r-1");
        assert_eq!(body["meta"]["channel"], "call");
    }

    #[test]
    fn parse_reads_text_and_echo() {
        let raw = r#"{"response":"雨还在下。","model":"qwen2.5:7b",
            "meta":{"window_id":"win-a","character_id":"c1","request_id":"r-1","role":"story","channel":"story"}}"#;
        let resp = LocalProvider::parse_body(raw.into(), "fallback").unwrap();
        assert_eq!(resp.text, "雨还在下。");
        assert_eq!(resp.model, "qwen2.5:7b");
        let echo = resp.echo.unwrap();
        assert_eq!(echo.window_id.as_str(), "win-a");
        assert_eq!(echo.request_id, "r-1");
        assert!(resp.blocked_reason.is_none());
    }

    #[test]
    fn parse_tolerates_missing_fields() {
        let resp = LocalProvider::parse_body("{}".into(), "m").unwrap();
        assert_eq!(resp.text, "");
        assert!(resp.echo.is_none());
        assert_eq!(resp.model, "m");
    }

    #[test]
    fn parse_reports_blocked() {
        let resp =
            LocalProvider::parse_body(r#"{"text":"","blocked":true}"#.into(), "m").unwrap();
        assert_eq!(resp.blocked_reason.as_deref(), Some("blocked"));
        let resp = LocalProvider::parse_body(
            r#"{"text":"","blocked_reason":"safety"}"#.into(),
            "m",
        )
        .unwrap();
        assert_eq!(resp.blocked_reason.as_deref(), Some("safety"));
    }

    #[test]
    fn parse_rejects_non_json() {
        let err = LocalProvider::parse_body("<html>".into(), "m").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
