//! World driver: decides whether a turn is story or a phone side effect.
//!
//! The classification call answers with a tagged JSON object. Every
//! variant has a validation step against world state; anything that fails
//! to decode or validate falls back to [`DriverDecision::ReplyStory`].

use crate::extract::json_object;
use crate::orchestrator::{AiOrchestrator, GenerateRequest};
use crate::prompts::{self, DriverContext};
use crate::rules::ResolvedRules;
use ringtale_core::language::Language;
use ringtale_core::provider::{PromptInput, TurnRole};
use ringtale_core::window::WindowId;
use ringtale_core::world::WorldState;
use ringtale_memory::WindowMemoryState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DriverDecision {
    ReplyStory,
    SendWechat {
        thread_id: String,
        #[serde(default)]
        text: String,
    },
    IncomingCall {
        #[serde(default)]
        caller: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<serde_json::Value>,
    },
    AddMomentComment {
        moment_id: String,
        #[serde(default)]
        text: String,
    },
}

impl DriverDecision {
    pub fn action_name(&self) -> &'static str {
        match self {
            DriverDecision::ReplyStory => "reply_story",
            DriverDecision::SendWechat { .. } => "send_wechat",
            DriverDecision::IncomingCall { .. } => "incoming_call",
            DriverDecision::AddMomentComment { .. } => "add_moment_comment",
        }
    }

    /// Check the decision against the window's world state.
    pub fn validate(&self, window: &WindowId, world: &dyn WorldState) -> Result<(), String> {
        match self {
            DriverDecision::ReplyStory => Ok(()),
            DriverDecision::SendWechat { thread_id, .. } => {
                if world.thread_exists(window, thread_id) {
                    Ok(())
                } else {
                    Err(format!("thread '{thread_id}' does not exist"))
                }
            }
            DriverDecision::IncomingCall { script, .. } => match script {
                None | Some(serde_json::Value::Array(_)) => Ok(()),
                Some(_) => Err("call script must be a list".into()),
            },
            DriverDecision::AddMomentComment { moment_id, .. } => match world.moment(window, moment_id) {
                Some(m) if !m.deleted => Ok(()),
                Some(_) => Err(format!("moment '{moment_id}' was deleted")),
                None => Err(format!("moment '{moment_id}' does not exist")),
            },
        }
    }

    /// Decode and validate classifier output, falling back to `ReplyStory`.
    pub fn decode(text: &str, window: &WindowId, world: &dyn WorldState) -> Self {
        let Some(map) = json_object(text) else {
            debug!(window = %window, "Driver output has no JSON object");
            return DriverDecision::ReplyStory;
        };
        let decision: DriverDecision = match serde_json::from_value(serde_json::Value::Object(map)) {
            Ok(d) => d,
            Err(e) => {
                debug!(window = %window, error = %e, "Driver output did not decode");
                return DriverDecision::ReplyStory;
            }
        };
        match decision.validate(window, world) {
            Ok(()) => decision,
            Err(reason) => {
                warn!(window = %window, action = decision.action_name(), reason = %reason, "Driver decision rejected");
                DriverDecision::ReplyStory
            }
        }
    }

    /// Call script lines, when present.
    pub fn script_lines(&self) -> Vec<String> {
        let DriverDecision::IncomingCall {
            script: Some(serde_json::Value::Array(items)),
            ..
        } = self
        else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                other => other
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|t| t.trim().to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub struct WorldDriver {
    orchestrator: Arc<AiOrchestrator>,
    world: Arc<dyn WorldState>,
    language: Language,
}

impl WorldDriver {
    pub fn new(orchestrator: Arc<AiOrchestrator>, world: Arc<dyn WorldState>, language: Language) -> Self {
        Self {
            orchestrator,
            world,
            language,
        }
    }

    /// Run the classification call for one turn, over the window's resolved
    /// rules, its memory tiers and the side-effect targets it has.
    pub async fn decide(
        &self,
        window: &WindowId,
        rules: &ResolvedRules,
        memory: &WindowMemoryState,
        user_input: &str,
    ) -> DriverDecision {
        let threads = self.world.threads(window);
        let moments = self.world.live_moments(window);
        let messages = prompts::driver_messages(&DriverContext {
            rules,
            memory,
            threads: &threads,
            moments: &moments,
            language: self.language,
            user_input,
        });
        let mut request = GenerateRequest::new(window.clone(), TurnRole::Utility, PromptInput::Messages(messages));
        if let Some(card) = &rules.card {
            request = request.with_character(&card.id);
        }
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return DriverDecision::ReplyStory;
        }
        let decision = DriverDecision::decode(&response.text, window, self.world.as_ref());
        debug!(window = %window, action = decision.action_name(), "World driver decided");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_memory::InMemoryWorld;

    fn world() -> (InMemoryWorld, WindowId) {
        let world = InMemoryWorld::new();
        let w = WindowId::sanitize("win-a");
        world.add_thread(&w, "lin");
        world.add_moment(&w, "m1", "lin");
        world.add_moment(&w, "m2", "lin");
        world.delete_moment(&w, "m2");
        (world, w)
    }

    #[test]
    fn valid_side_effects_decode() {
        let (world, w) = world();
        let d = DriverDecision::decode(
            r#"{"action": "send_wechat", "thread_id": "lin", "text": "在吗"}"#,
            &w,
            &world,
        );
        assert_eq!(d.action_name(), "send_wechat");

        let d = DriverDecision::decode(
            r#"{"action": "add_moment_comment", "moment_id": "m1", "text": "好看"}"#,
            &w,
            &world,
        );
        assert_eq!(d.action_name(), "add_moment_comment");

        let d = DriverDecision::decode(
            r#"{"action": "incoming_call", "caller": "林", "script": ["喂？", {"text": "是我"}]}"#,
            &w,
            &world,
        );
        assert_eq!(d.script_lines(), vec!["喂？", "是我"]);
    }

    #[test]
    fn invalid_targets_fall_back() {
        let (world, w) = world();
        for text in [
            r#"{"action": "send_wechat", "thread_id": "ghost", "text": "hi"}"#,
            r#"{"action": "add_moment_comment", "moment_id": "m2", "text": "hi"}"#,
            r#"{"action": "add_moment_comment", "moment_id": "m9", "text": "hi"}"#,
            r#"{"action": "incoming_call", "script": "not a list"}"#,
            r#"{"action": "dance"}"#,
            "reply_story please",
        ] {
            assert_eq!(DriverDecision::decode(text, &w, &world), DriverDecision::ReplyStory, "{text}");
        }
    }

    #[test]
    fn other_windows_threads_are_invisible() {
        let (world, _) = world();
        let other = WindowId::sanitize("win-b");
        let d = DriverDecision::decode(
            r#"{"action": "send_wechat", "thread_id": "lin", "text": "hi"}"#,
            &other,
            &world,
        );
        assert_eq!(d, DriverDecision::ReplyStory);
    }
}
