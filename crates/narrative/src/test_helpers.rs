//! Shared test helpers: a provider scripted per turn role.

use ringtale_core::error::ProviderError;
use ringtale_core::provider::{Provider, ProviderRequest, ProviderResponse, RequestStamp, TurnRole};
use ringtale_core::window::WindowId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

enum Echo {
    None,
    Request,
    As { window: String, request: String },
}

/// A mock provider that answers each role from its own queue.
///
/// An unscripted call answers with empty text, like a backend that
/// returned nothing.
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<TurnRole, VecDeque<Result<ProviderResponse, ProviderError>>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    echo: Echo,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            echo: Echo::None,
            delay: None,
        }
    }

    /// Echo each request's stamp back, like the local backend does.
    pub fn echoing(mut self) -> Self {
        self.echo = Echo::Request;
        self
    }

    /// Echo a fixed, foreign stamp.
    pub fn echoing_as(mut self, window: &str, request: &str) -> Self {
        self.echo = Echo::As {
            window: window.into(),
            request: request.into(),
        };
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, role: TurnRole, text: &str) {
        self.push_result(role, Ok(ProviderResponse::text(text)));
    }

    pub fn push_error(&self, role: TurnRole, error: ProviderError) {
        self.push_result(role, Err(error));
    }

    pub fn push_blocked(&self, role: TurnRole, reason: &str) {
        let mut resp = ProviderResponse::text("");
        resp.blocked_reason = Some(reason.into());
        self.push_result(role, Ok(resp));
    }

    fn push_result(&self, role: TurnRole, result: Result<ProviderResponse, ProviderError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(result);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, role: TurnRole) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.stamp.role == role)
            .count()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.stamp.role)
            .and_then(|q| q.pop_front());
        let mut response = next.unwrap_or_else(|| Ok(ProviderResponse::text("")))?;
        response.echo = match &self.echo {
            Echo::None => None,
            Echo::Request => Some(request.stamp.clone()),
            Echo::As { window, request: id } => Some(RequestStamp {
                window_id: WindowId::sanitize(window),
                request_id: id.clone(),
                ..request.stamp.clone()
            }),
        };
        Ok(response)
    }
}
