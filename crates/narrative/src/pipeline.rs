//! The narrative turn pipeline.
//!
//! One call to [`NarrativeEngine::generate_narrative_reply`] takes a user
//! input through the whole turn:
//!
//! ```text
//! resolve window ─▶ bound card? ─▶ rules ─▶ world driver ─┬─▶ side effect (validated, returned)
//!                                                         │
//!                                                         └─▶ matcher ─▶ narrator ─▶ sanitize ─▶ validate
//!                                                                                             │
//!                                                   accepted: raw cache, story log, consolidation
//!                                                   rejected: placeholder, memory untouched
//! ```
//!
//! Nothing in a turn is fatal. Transport failures become empty text, which
//! the validator rejects; scope violations abort the turn before any memory
//! is written.

use crate::consolidation::{ConsolidationEngine, ConsolidationSettings};
use crate::inspector::MemoryInspector;
use crate::matcher::Matcher;
use crate::orchestrator::{AiOrchestrator, GenerateRequest};
use crate::prompts::{self, NarratorContext};
use crate::rules::{GlobalRules, RuleContextResolver};
use crate::setup::{InitializerError, InitializerInput, SeedPayload, SetupAssistant};
use crate::world_driver::{DriverDecision, WorldDriver};
use chrono::Utc;
use ringtale_config::AppConfig;
use ringtale_core::character::{Card, CharacterStore};
use ringtale_core::error::ScopeError;
use ringtale_core::event::{DomainEvent, EventBus};
use ringtale_core::language::Language;
use ringtale_core::provider::{Channel, PromptInput, TurnRole};
use ringtale_core::window::{WindowContext, WindowId};
use ringtale_core::world::WorldState;
use ringtale_memory::{PendingEvent, WindowMemoryStore};
use ringtale_validator::{
    CallLine, OutputValidator, RejectReason, Rule, RuleSet, ValidatorError, parse_call, sanitize,
};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Turn types ────────────────────────────────────────────────────────────

/// Why a turn was abandoned before producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    WindowMismatch,
    RequestMismatch,
    MissingCharacter,
}

/// The action a completed turn resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    ReplyStory,
    SendWechat,
    IncomingCall,
    AddMomentComment,
}

impl From<&DriverDecision> for TurnAction {
    fn from(decision: &DriverDecision) -> Self {
        match decision {
            DriverDecision::ReplyStory => TurnAction::ReplyStory,
            DriverDecision::SendWechat { .. } => TurnAction::SendWechat,
            DriverDecision::IncomingCall { .. } => TurnAction::IncomingCall,
            DriverDecision::AddMomentComment { .. } => TurnAction::AddMomentComment,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyMeta {
    pub bad_output: bool,
    pub refusal: bool,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_transcript: Option<Vec<CallLine>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_fold_title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaked_windows: Vec<String>,
}

/// What the story view renders for a narrator turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    pub is_ai: bool,
    #[serde(rename = "type")]
    pub kind: Channel,
    pub meta: ReplyMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnPayload {
    Reply(ReplyPayload),
    /// A validated side-effect decision, as the driver produced it.
    Action(DriverDecision),
}

/// The result of one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        action: TurnAction,
        payload: TurnPayload,
        window_id: WindowId,
        request_id: String,
    },
    Aborted {
        reason: AbortReason,
        window_id: WindowId,
        request_id: String,
    },
}

impl TurnOutcome {
    fn aborted(reason: AbortReason, window_id: WindowId, request_id: String) -> Self {
        TurnOutcome::Aborted {
            reason,
            window_id,
            request_id,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnOutcome::Aborted { .. })
    }

    /// The narrator payload, when the turn produced one.
    pub fn reply(&self) -> Option<&ReplyPayload> {
        match self {
            TurnOutcome::Completed {
                payload: TurnPayload::Reply(reply),
                ..
            } => Some(reply),
            _ => None,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            TurnOutcome::Completed { request_id, .. } | TurnOutcome::Aborted { request_id, .. } => request_id,
        }
    }
}

impl Serialize for TurnOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TurnOutcome::Completed {
                action,
                payload,
                window_id,
                request_id,
            } => {
                let mut s = serializer.serialize_struct("TurnOutcome", 5)?;
                s.serialize_field("aborted", &false)?;
                s.serialize_field("action", action)?;
                s.serialize_field("payload", payload)?;
                s.serialize_field("window_id", window_id)?;
                s.serialize_field("request_id", request_id)?;
                s.end()
            }
            TurnOutcome::Aborted {
                reason,
                window_id,
                request_id,
            } => {
                let mut s = serializer.serialize_struct("TurnOutcome", 4)?;
                s.serialize_field("aborted", &true)?;
                s.serialize_field("reason", reason)?;
                s.serialize_field("window_id", window_id)?;
                s.serialize_field("request_id", request_id)?;
                s.end()
            }
        }
    }
}

/// Turn progress reported through [`TurnHooks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Matching,
    Generating,
}

/// Caller hooks for one turn.
#[derive(Default)]
pub struct TurnHooks {
    /// Echoed on the outcome. Generated when absent.
    pub request_id: Option<String>,
    /// Force a narrator channel, skipping the world driver.
    pub channel: Option<Channel>,
    pub on_progress: Option<Box<dyn Fn(Progress) + Send + Sync>>,
}

impl TurnHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn on_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    fn progress(&self, p: Progress) {
        if let Some(f) = &self.on_progress {
            f(p);
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub language: Language,
    pub placeholder: String,
    pub stm_user_inputs: usize,
    pub ltm_threshold: usize,
    /// Run the world-driver classification before narrator turns.
    pub world_driver: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: Language::Zh,
            placeholder: "（信号不好，对方似乎没有回应……）".into(),
            stm_user_inputs: 4,
            ltm_threshold: 1500,
            world_driver: true,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            language: config.language,
            placeholder: config.validator.placeholder.clone(),
            stm_user_inputs: config.memory.stm_user_inputs,
            ltm_threshold: config.memory.ltm_threshold,
            world_driver: true,
        }
    }
}

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub memory: Arc<WindowMemoryStore>,
    pub characters: Arc<dyn CharacterStore>,
    pub world: Arc<dyn WorldState>,
    pub orchestrator: Arc<AiOrchestrator>,
    pub validator: Arc<OutputValidator>,
    pub events: Arc<EventBus>,
    pub rules: GlobalRules,
}

/// Build the output validator from configuration: built-in rules for the
/// target and fallback language plus configured extras.
pub fn validator_from_config(config: &AppConfig) -> Result<OutputValidator, ValidatorError> {
    let mut set = RuleSet::builtin(config.language, config.fallback_language);
    for rule in &config.validator.rules {
        let reason = RejectReason::parse(&rule.reason).ok_or_else(|| ValidatorError::InvalidRule {
            name: rule.name.clone(),
            reason: format!("unknown reason '{}'", rule.reason),
        })?;
        let mut r = Rule::new(&rule.name, &rule.pattern, reason);
        r.enabled = rule.enabled;
        set.add(r);
    }
    OutputValidator::new(set)
}

/// The session's narrative pipeline, bound to one window.
pub struct NarrativeEngine {
    window: WindowContext,
    memory: Arc<WindowMemoryStore>,
    characters: Arc<dyn CharacterStore>,
    world: Arc<dyn WorldState>,
    orchestrator: Arc<AiOrchestrator>,
    validator: Arc<OutputValidator>,
    events: Arc<EventBus>,
    resolver: RuleContextResolver,
    consolidation: ConsolidationEngine,
    driver: WorldDriver,
    matcher: Matcher,
    setup: SetupAssistant,
    settings: EngineSettings,
}

impl NarrativeEngine {
    pub fn new(window: WindowContext, deps: EngineDeps, settings: EngineSettings) -> Self {
        let consolidation = ConsolidationEngine::new(
            deps.orchestrator.clone(),
            deps.memory.clone(),
            deps.world.clone(),
            deps.events.clone(),
            ConsolidationSettings {
                language: settings.language,
                stm_user_inputs: settings.stm_user_inputs,
                ltm_threshold: settings.ltm_threshold,
            },
        );
        Self {
            resolver: RuleContextResolver::new(deps.rules, settings.language),
            driver: WorldDriver::new(deps.orchestrator.clone(), deps.world.clone(), settings.language),
            matcher: Matcher::new(deps.orchestrator.clone(), settings.language),
            setup: SetupAssistant::new(deps.orchestrator.clone(), settings.language),
            consolidation,
            window,
            memory: deps.memory,
            characters: deps.characters,
            world: deps.world,
            orchestrator: deps.orchestrator,
            validator: deps.validator,
            events: deps.events,
            settings,
        }
    }

    pub fn window(&self) -> &WindowId {
        self.window.window()
    }

    pub fn consolidation(&self) -> &ConsolidationEngine {
        &self.consolidation
    }

    pub fn inspector(&self) -> MemoryInspector {
        MemoryInspector::new(self.window.clone(), self.memory.clone())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Wait for queued consolidation jobs of the session's window.
    pub async fn flush_memory(&self) {
        self.consolidation.flush(self.window.window()).await;
    }

    /// Run one narrative turn.
    pub async fn generate_narrative_reply(&self, user_input: &str, window_id: &str, hooks: TurnHooks) -> TurnOutcome {
        let request_id = hooks
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let window = match self.window.resolve(window_id) {
            Ok(w) => w,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Turn aborted");
                return TurnOutcome::aborted(AbortReason::WindowMismatch, WindowId::sanitize(window_id), request_id);
            }
        };

        let Some(card) = self.characters.card_for_window(&window) else {
            warn!(window = %window, request_id = %request_id, "No character bound, turn aborted");
            return TurnOutcome::aborted(AbortReason::MissingCharacter, window, request_id);
        };

        let state = self.memory.snapshot(&window);
        let rules = self
            .resolver
            .resolve(Some(&card), &window, &self.memory.overrides(&window));

        let channel = match hooks.channel {
            Some(channel) => channel,
            None if self.settings.world_driver => {
                let decision = self.driver.decide(&window, &rules, &state, user_input).await;
                if decision != DriverDecision::ReplyStory {
                    return self.side_effect(window, request_id, decision);
                }
                Channel::Story
            }
            None => Channel::Story,
        };

        hooks.progress(Progress::Matching);
        let notes = self.matcher.notes(&window, &card.id, &state, user_input).await;

        hooks.progress(Progress::Generating);
        let messages = prompts::narrator_messages(&NarratorContext {
            rules: &rules,
            memory: &state,
            matcher_notes: notes.as_deref(),
            channel,
            language: self.settings.language,
            user_input,
        });
        let request = GenerateRequest::new(window.clone(), TurnRole::Story, PromptInput::Messages(messages))
            .with_character(&card.id)
            .with_request_id(&request_id)
            .with_channel(channel);
        let response = self.orchestrator.generate(request).await;

        if response.window_id != window {
            warn!(window = %window, echoed = %response.window_id, "Narrator response for another window");
            return TurnOutcome::aborted(AbortReason::WindowMismatch, window, request_id);
        }
        if response.request_id != request_id {
            warn!(window = %window, request_id = %request_id, echoed = %response.request_id, "Stale narrator response");
            return TurnOutcome::aborted(AbortReason::RequestMismatch, window, request_id);
        }

        let text = if response.blocked {
            debug!(reason = ?response.blocked_reason, "Backend blocked narrator output");
            String::new()
        } else {
            sanitize(&response.text)
        };
        let verdict = self.validator.validate_for(window.as_str(), &text, channel);

        let mut meta = ReplyMeta {
            channel,
            leaked_windows: response.leaked_windows,
            ..ReplyMeta::default()
        };

        let text = if verdict.accepted {
            self.accept(&window, &request_id, user_input, &text, channel);
            if channel == Channel::Call
                && let Some(call) = parse_call(&text, &card.name, self.settings.language)
            {
                meta.call_transcript = Some(call.lines);
                meta.call_fold_title = Some(call.fold_title);
            }
            text
        } else {
            let reason = verdict.reason.map(|r| r.as_str()).unwrap_or("unknown");
            self.events.publish(DomainEvent::TurnRejected {
                window_id: window.to_string(),
                request_id: request_id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
            meta.bad_output = true;
            meta.refusal = verdict.is_refusal();
            meta.reject_reason = verdict.reason;
            self.settings.placeholder.clone()
        };

        TurnOutcome::Completed {
            action: TurnAction::ReplyStory,
            payload: TurnPayload::Reply(ReplyPayload {
                text,
                is_ai: true,
                kind: channel,
                meta,
            }),
            window_id: window,
            request_id,
        }
    }

    fn accept(&self, window: &WindowId, request_id: &str, user_input: &str, text: &str, channel: Channel) {
        self.memory.push_raw_reply(window, text);
        self.world.record_turn(window, user_input, text);
        self.memory.mark_turn_taken(window);
        let drained = self.memory.take_pending_digest(window);
        info!(
            window = %window,
            request_id = %request_id,
            channel = channel.as_str(),
            pending_drained = drained.len(),
            "Narrator turn accepted"
        );
        self.events.publish(DomainEvent::TurnAccepted {
            window_id: window.to_string(),
            request_id: request_id.to_string(),
            channel: channel.as_str().to_string(),
            timestamp: Utc::now(),
        });
        // Runs on the window's serial queue; completion is observed via flush.
        drop(self.consolidation.on_turn_accepted(window));
    }

    fn side_effect(&self, window: WindowId, request_id: String, decision: DriverDecision) -> TurnOutcome {
        let summary = match &decision {
            DriverDecision::SendWechat { thread_id, text } => format!("message to {thread_id}: {text}"),
            DriverDecision::IncomingCall { caller, .. } => format!("incoming call from {caller}"),
            DriverDecision::AddMomentComment { moment_id, text } => format!("comment on {moment_id}: {text}"),
            DriverDecision::ReplyStory => String::new(),
        };
        self.memory
            .append_pending_event(&window, PendingEvent::new(decision.action_name(), summary));
        info!(window = %window, request_id = %request_id, action = decision.action_name(), "Side effect chosen");
        TurnOutcome::Completed {
            action: TurnAction::from(&decision),
            payload: TurnPayload::Action(decision),
            window_id: window,
            request_id,
        }
    }

    /// Fill the card's empty fields. Returns only the fields that were
    /// filled.
    pub async fn run_setup_assistant(
        &self,
        card: &Card,
        preference: &str,
        window_id: &str,
    ) -> Result<BTreeMap<String, String>, ScopeError> {
        let window = self.window.resolve(window_id)?;
        Ok(self.setup.fill_card(&window, card, preference).await)
    }

    /// Seed a fresh window and store its opening text.
    pub async fn run_initializer(&self, input: InitializerInput) -> Result<SeedPayload, InitializerError> {
        let window = self.window.resolve(&input.window_id)?;
        let seed = self.setup.initialize(&window, &input).await?;
        if !input.opening_text.trim().is_empty() {
            self.memory.set_opening_text(&window, &input.opening_text);
        }
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use ringtale_core::character::Card;
    use ringtale_memory::{CardRegistry, InMemoryStore, InMemoryWorld};
    use ringtale_providers::ProviderRouter;
    use std::sync::Mutex;

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        memory: Arc<WindowMemoryStore>,
        world: Arc<InMemoryWorld>,
        engine: NarrativeEngine,
    }

    fn fixture(provider: ScriptedProvider, world_driver: bool) -> Fixture {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryStore::new());
        let memory = Arc::new(WindowMemoryStore::new(store.clone()));
        let cards = Arc::new(CardRegistry::new(store));
        cards
            .upsert(&Card {
                id: "lin".into(),
                name: "林".into(),
                ..Card::default()
            })
            .unwrap();
        cards.bind(&WindowId::sanitize("win-a"), "lin").unwrap();
        let world = Arc::new(InMemoryWorld::new());
        let events = Arc::new(EventBus::default());
        let orchestrator = Arc::new(AiOrchestrator::new(
            ProviderRouter::single(provider.clone(), "mock"),
            memory.clone(),
            events.clone(),
        ));
        let validator = Arc::new(OutputValidator::new(RuleSet::builtin(Language::Zh, Language::En)).unwrap());
        let engine = NarrativeEngine::new(
            WindowContext::new("win-a"),
            EngineDeps {
                memory: memory.clone(),
                characters: cards,
                world: world.clone(),
                orchestrator,
                validator,
                events,
                rules: GlobalRules::default(),
            },
            EngineSettings {
                world_driver,
                ..EngineSettings::default()
            },
        );
        Fixture {
            provider,
            memory,
            world,
            engine,
        }
    }

    #[tokio::test]
    async fn accepted_turn_updates_memory_and_reports_progress() {
        let f = fixture(ScriptedProvider::new().echoing(), false);
        f.provider.push(TurnRole::Story, "旁白：林把伞撑开。");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks = TurnHooks::new()
            .with_request_id("req-1")
            .on_progress(move |p| sink.lock().unwrap().push(p));

        let outcome = f.engine.generate_narrative_reply("下雨了", "win-a", hooks).await;
        assert_eq!(outcome.request_id(), "req-1");
        let reply = outcome.reply().unwrap();
        assert_eq!(reply.text, "林把伞撑开。");
        assert!(!reply.meta.bad_output);
        assert_eq!(*seen.lock().unwrap(), vec![Progress::Matching, Progress::Generating]);

        let w = WindowId::sanitize("win-a");
        assert_eq!(f.memory.raw_replies(&w, None), vec!["林把伞撑开。"]);
        assert!(!f.memory.snapshot(&w).is_first_turn);
        assert_eq!(f.world.story_log(&w).len(), 1);
        f.engine.flush_memory().await;
    }

    #[tokio::test]
    async fn window_mismatch_aborts_before_any_call() {
        let f = fixture(ScriptedProvider::new(), true);
        let outcome = f
            .engine
            .generate_narrative_reply("hi", "win-b", TurnHooks::new())
            .await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["aborted"], true);
        assert_eq!(json["reason"], "window-mismatch");
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_character_aborts() {
        let f = fixture(ScriptedProvider::new(), true);
        let engine = NarrativeEngine {
            window: WindowContext::new("win-z"),
            ..f.engine
        };
        let outcome = engine.generate_narrative_reply("hi", "win-z", TurnHooks::new()).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Aborted {
                reason: AbortReason::MissingCharacter,
                ..
            }
        ));
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn foreign_request_echo_aborts() {
        let f = fixture(ScriptedProvider::new().echoing_as("win-a", "someone-else"), false);
        f.provider.push(TurnRole::Story, "林笑了。");
        let outcome = f
            .engine
            .generate_narrative_reply("hi", "win-a", TurnHooks::new().with_request_id("mine"))
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Aborted {
                reason: AbortReason::RequestMismatch,
                ..
            }
        ));
        assert!(f.memory.raw_replies(&WindowId::sanitize("win-a"), None).is_empty());
    }

    #[tokio::test]
    async fn call_without_end_marker_is_placeholder_refusal() {
        let f = fixture(ScriptedProvider::new(), false);
        f.provider
            .push(TurnRole::Story, "[CALL_START]\n[CALL] 林：喂？\n[CALL] 林：你在吗？");
        let outcome = f
            .engine
            .generate_narrative_reply("打给林", "win-a", TurnHooks::new().with_channel(Channel::Call))
            .await;
        let reply = outcome.reply().unwrap();
        assert_eq!(reply.text, EngineSettings::default().placeholder);
        assert!(reply.meta.refusal);
        assert!(reply.meta.bad_output);
        assert!(f.memory.raw_replies(&WindowId::sanitize("win-a"), None).is_empty());
    }

    #[tokio::test]
    async fn accepted_call_is_folded() {
        let f = fixture(ScriptedProvider::new(), false);
        f.provider.push(
            TurnRole::Story,
            "[CALL_START]\n[CALL] 林：喂？\n[CALL] 林：我到楼下了。\n[CALL_END]",
        );
        let outcome = f
            .engine
            .generate_narrative_reply("接电话", "win-a", TurnHooks::new().with_channel(Channel::Call))
            .await;
        let meta = &outcome.reply().unwrap().meta;
        assert_eq!(meta.call_transcript.as_ref().unwrap().len(), 2);
        assert_eq!(meta.call_fold_title.as_deref(), Some("与林的通话"));
    }

    #[tokio::test]
    async fn leaked_prompt_never_reaches_memory() {
        let f = fixture(ScriptedProvider::new(), false);
        f.provider.push(TurnRole::Story, "【SHORT-TERM MEMORY】两人重逢。");
        let outcome = f
            .engine
            .generate_narrative_reply("继续", "win-a", TurnHooks::new())
            .await;
        let reply = outcome.reply().unwrap();
        assert!(reply.meta.bad_output);
        assert!(!reply.meta.refusal);
        assert_eq!(reply.meta.reject_reason, Some(RejectReason::PromptLeak));
        let w = WindowId::sanitize("win-a");
        assert!(f.memory.raw_replies(&w, None).is_empty());
        assert!(f.world.story_log(&w).is_empty());
        assert!(f.memory.snapshot(&w).is_first_turn);
    }

    #[tokio::test]
    async fn side_effect_decision_is_returned_and_queued() {
        let f = fixture(ScriptedProvider::new(), true);
        let w = WindowId::sanitize("win-a");
        f.world.add_thread(&w, "lin");
        f.provider.push(
            TurnRole::Utility,
            r#"{"action": "send_wechat", "thread_id": "lin", "text": "到家了吗"}"#,
        );
        let outcome = f
            .engine
            .generate_narrative_reply("给林发消息", "win-a", TurnHooks::new())
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Completed {
                action: TurnAction::SendWechat,
                ..
            }
        ));
        assert_eq!(f.provider.calls(TurnRole::Story), 0);
        let pending = f.memory.snapshot(&w).pending_events;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "send_wechat");
    }

    #[tokio::test]
    async fn invalid_driver_decision_falls_back_to_story() {
        let f = fixture(ScriptedProvider::new(), true);
        f.provider.push(
            TurnRole::Utility,
            r#"{"action": "send_wechat", "thread_id": "ghost", "text": "hi"}"#,
        );
        f.provider.push(TurnRole::Story, "林看了看手机。");
        let outcome = f
            .engine
            .generate_narrative_reply("发消息", "win-a", TurnHooks::new())
            .await;
        assert_eq!(outcome.reply().unwrap().text, "林看了看手机。");
    }

    #[tokio::test]
    async fn driver_sees_memory_and_existing_targets() {
        let f = fixture(ScriptedProvider::new(), true);
        let w = WindowId::sanitize("win-a");
        f.memory.set_ltm(&w, "两人是青梅竹马。");
        f.memory.set_stm(&w, "刚在车站吵了一架。");
        f.memory.set_persona(&w, "玩家怕黑。");
        f.world.add_thread(&w, "thread-lin");
        f.world.add_moment(&w, "m1", "lin");
        f.world.add_moment(&w, "m2", "lin");
        f.world.delete_moment(&w, "m2");
        f.provider.push(
            TurnRole::Utility,
            r#"{"action": "send_wechat", "thread_id": "thread-lin", "text": "对不起"}"#,
        );

        let outcome = f
            .engine
            .generate_narrative_reply("给她发消息", "win-a", TurnHooks::new())
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Completed {
                action: TurnAction::SendWechat,
                ..
            }
        ));

        let prompt = f.provider.requests()[0].input.as_prompt();
        for needle in ["两人是青梅竹马。", "刚在车站吵了一架。", "玩家怕黑。", "thread-lin", "- m1 (by lin)", "林"] {
            assert!(prompt.contains(needle), "driver prompt is missing {needle}");
        }
        assert!(!prompt.contains("m2"));
    }

    #[tokio::test]
    async fn response_for_another_window_aborts() {
        let f = fixture(ScriptedProvider::new().echoing_as("win-b", "r1"), false);
        f.provider.push(TurnRole::Story, "林笑了。");
        let outcome = f
            .engine
            .generate_narrative_reply("hi", "win-a", TurnHooks::new().with_request_id("r1"))
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Aborted {
                reason: AbortReason::WindowMismatch,
                ..
            }
        ));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["aborted"], true);
        assert_eq!(json["reason"], "window-mismatch");
        assert_eq!(json["window_id"], "win-a");
        assert_eq!(json["request_id"], "r1");
        assert!(f.memory.raw_replies(&WindowId::sanitize("win-a"), None).is_empty());
    }

    #[tokio::test]
    async fn setup_and_initializer_are_window_checked() {
        let f = fixture(ScriptedProvider::new(), false);
        let card = Card::default();
        assert!(f.engine.run_setup_assistant(&card, "", "win-b").await.is_err());

        f.provider.push(TurnRole::Initializer, r#"{"contacts": [], "moments": []}"#);
        let seed = f
            .engine
            .run_initializer(InitializerInput {
                window_id: "win-a".into(),
                opening_text: "雨夜，车站。".into(),
                ..InitializerInput::default()
            })
            .await
            .unwrap();
        assert!(seed.contacts.is_empty());
        assert_eq!(
            f.memory.snapshot(&WindowId::sanitize("win-a")).opening_text,
            "雨夜，车站。"
        );
    }
}
