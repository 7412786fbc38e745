//! Memory consolidation: STM regeneration and the STM → LTM hand-off.
//!
//! Both jobs only run on the per-window [`SerialQueue`], so memory
//! mutations for one window never interleave. An LTM check holds a slot in
//! the consolidating set from the moment it is queued until it finishes; a
//! second check for the same window is not queued while one is pending.

use crate::extract::{is_placeholder, json_object, string_field};
use crate::orchestrator::{AiOrchestrator, GenerateRequest};
use crate::prompts;
use chrono::Utc;
use ringtale_core::event::{DomainEvent, EventBus};
use ringtale_core::language::{Language, is_mostly_foreign};
use ringtale_core::markers::{self, section};
use ringtale_core::provider::{PromptInput, TurnRole};
use ringtale_core::window::WindowId;
use ringtale_core::world::WorldState;
use ringtale_memory::{SerialQueue, WindowMemoryStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConsolidationSettings {
    pub language: Language,
    /// How many recent user inputs feed STM regeneration.
    pub stm_user_inputs: usize,
    /// STM length (characters) at which LTM consolidation triggers.
    pub ltm_threshold: usize,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            language: Language::Zh,
            stm_user_inputs: 4,
            ltm_threshold: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmOutcome {
    Updated,
    /// The previous STM was kept.
    Kept(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LtmOutcome {
    Consolidated,
    BelowThreshold,
    AlreadyHasLtm,
    InFlight,
    /// The summarizer's answer was unusable; nothing changed.
    Kept(String),
}

#[derive(Clone)]
pub struct ConsolidationEngine {
    orchestrator: Arc<AiOrchestrator>,
    memory: Arc<WindowMemoryStore>,
    world: Arc<dyn WorldState>,
    queue: Arc<SerialQueue>,
    consolidating: Arc<Mutex<HashSet<WindowId>>>,
    events: Arc<EventBus>,
    settings: ConsolidationSettings,
}

impl ConsolidationEngine {
    pub fn new(
        orchestrator: Arc<AiOrchestrator>,
        memory: Arc<WindowMemoryStore>,
        world: Arc<dyn WorldState>,
        events: Arc<EventBus>,
        settings: ConsolidationSettings,
    ) -> Self {
        Self {
            orchestrator,
            memory,
            world,
            queue: Arc::new(SerialQueue::new()),
            consolidating: Arc::new(Mutex::new(HashSet::new())),
            events,
            settings,
        }
    }

    /// Queue the automatic jobs that follow an accepted narrator turn.
    /// Each runs only if its auto flag is set. The LTM check is skipped when
    /// another one is already queued for the window.
    pub fn on_turn_accepted(&self, window: &WindowId) -> oneshot::Receiver<()> {
        let engine = self.clone();
        let w = window.clone();
        let ltm_slot = InFlightGuard::acquire(&self.consolidating, window);
        if ltm_slot.is_none() {
            debug!(window = %window, "LTM check already queued");
        }
        self.queue.submit(window, async move {
            let state = engine.memory.snapshot(&w);
            if state.stm_auto {
                engine.regenerate_stm(&w).await;
            }
            if let Some(slot) = ltm_slot
                && state.ltm_auto
            {
                engine.run_ltm(&w, true, slot).await;
            }
        })
    }

    /// Queue an explicit STM regeneration, ignoring the auto flag.
    pub fn schedule_stm(&self, window: &WindowId) -> oneshot::Receiver<StmOutcome> {
        let engine = self.clone();
        let w = window.clone();
        self.queue
            .submit(window, async move { engine.regenerate_stm(&w).await })
    }

    /// Queue an explicit LTM consolidation, ignoring the auto flag.
    /// Resolves to [`LtmOutcome::InFlight`] without queueing when a check
    /// for the window is already pending.
    pub fn schedule_ltm(&self, window: &WindowId) -> oneshot::Receiver<LtmOutcome> {
        let Some(slot) = InFlightGuard::acquire(&self.consolidating, window) else {
            debug!(window = %window, "LTM consolidation already queued");
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(LtmOutcome::InFlight);
            return rx;
        };
        let engine = self.clone();
        let w = window.clone();
        self.queue
            .submit(window, async move { engine.run_ltm(&w, false, slot).await })
    }

    /// Wait for every queued job of `window`.
    pub async fn flush(&self, window: &WindowId) {
        self.queue.flush(window).await;
    }

    /// Regenerate STM from the previous STM, the raw-reply cache and the
    /// last few user inputs.
    async fn regenerate_stm(&self, window: &WindowId) -> StmOutcome {
        let previous = self.memory.stm(window);
        let raw = self.memory.raw_replies(window, None);
        let inputs = self
            .world
            .recent_user_inputs(window, self.settings.stm_user_inputs);
        if raw.is_empty() && inputs.is_empty() {
            return StmOutcome::Kept("nothing to summarize".into());
        }

        let request = GenerateRequest::new(
            window.clone(),
            TurnRole::System,
            PromptInput::Messages(prompts::stm_messages(
                &previous,
                &raw,
                &inputs,
                self.settings.language,
            )),
        );
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return StmOutcome::Kept("stale response".into());
        }
        let Some(summary) = response.usable_text() else {
            return StmOutcome::Kept("empty summary".into());
        };

        if let Err(reason) = accept_stm(summary, self.settings.language) {
            debug!(window = %window, reason, "STM candidate rejected");
            return StmOutcome::Kept(reason.into());
        }

        self.memory.set_stm(window, summary);
        self.publish(window, "stm", summary.chars().count());
        StmOutcome::Updated
    }

    /// The hand-off happens once per window: `has_ltm` stays set even if
    /// the LTM text is later emptied, until the window is reset.
    async fn run_ltm(&self, window: &WindowId, automatic: bool, _slot: InFlightGuard) -> LtmOutcome {
        let state = self.memory.snapshot(window);
        if state.has_ltm {
            return LtmOutcome::AlreadyHasLtm;
        }
        if state.stm.chars().count() < self.settings.ltm_threshold {
            return LtmOutcome::BelowThreshold;
        }

        let request = GenerateRequest::new(
            window.clone(),
            TurnRole::System,
            PromptInput::Messages(prompts::ltm_messages(
                &state.stm,
                &state.persona,
                self.settings.language,
            )),
        );
        let response = self.orchestrator.generate(request.clone()).await;
        if !response.belongs_to(&request) {
            return LtmOutcome::Kept("stale response".into());
        }

        let Some(fields) = response.usable_text().and_then(json_object) else {
            return LtmOutcome::Kept("summary is not a JSON object".into());
        };
        let Some(world) = string_field(&fields, "world_summary").filter(|s| !is_placeholder(s)) else {
            return LtmOutcome::Kept("world_summary missing or placeholder".into());
        };
        let persona = string_field(&fields, "persona_summary")
            .filter(|s| !is_placeholder(s))
            .filter(|_| !automatic || state.persona_auto)
            .unwrap_or_default();

        self.memory.complete_ltm_handoff(window, &world, &persona);
        info!(
            window = %window,
            ltm_chars = world.chars().count(),
            persona_updated = !persona.is_empty(),
            "STM consolidated into LTM"
        );
        self.publish(window, "ltm", world.chars().count());
        LtmOutcome::Consolidated
    }

    fn publish(&self, window: &WindowId, tier: &str, length: usize) {
        self.events.publish(DomainEvent::MemoryConsolidated {
            window_id: window.to_string(),
            tier: tier.into(),
            length,
            timestamp: Utc::now(),
        });
    }
}

/// A window's slot in the consolidating set, released on drop.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<WindowId>>>,
    window: WindowId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<WindowId>>>, window: &WindowId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(window.clone());
        inserted.then(|| Self {
            set: set.clone(),
            window: window.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.window);
    }
}

const QUOTE_MARKS: [char; 7] = ['"', '“', '”', '「', '」', '『', '』'];

/// STM must read as a summary: non-empty, in the window's language, and
/// free of dialogue or prompt structure.
fn accept_stm(text: &str, language: Language) -> Result<(), &'static str> {
    if text.trim().is_empty() {
        return Err("empty");
    }
    if is_mostly_foreign(text, language) {
        return Err("foreign script");
    }
    if text.contains(QUOTE_MARKS) {
        return Err("contains quotation marks");
    }
    let tagged = section::ALL.iter().any(|l| text.contains(l))
        || [markers::CALL_START, markers::CALL_LINE, markers::MOMENT, "<think>", "【"]
            .iter()
            .any(|t| text.contains(t));
    if tagged {
        return Err("contains structural tags");
    }
    Ok(())
}
