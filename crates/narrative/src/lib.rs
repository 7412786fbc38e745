//! The narrative pipeline of Ringtale.
//!
//! One turn flows through these pieces:
//!
//! 1. **Resolve** the window named by the call against the session's own
//! 2. **Decide** via the world driver whether this is story or a phone side effect
//! 3. **Assemble** rules ([`rules`]) and memory tiers into the narrator prompt ([`prompts`])
//! 4. **Generate** through the [`orchestrator`], with echo and leak checks
//! 5. **Validate** the reply; accepted text feeds [`consolidation`], rejected text never does
//!
//! Card setup and window seeding live in [`setup`]; manual memory edits in
//! [`inspector`].

pub mod consolidation;
mod extract;
pub mod inspector;
pub mod matcher;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod rules;
pub mod setup;
pub mod world_driver;

#[cfg(test)]
mod test_helpers;

pub use consolidation::{ConsolidationEngine, ConsolidationSettings, LtmOutcome, StmOutcome};
pub use inspector::MemoryInspector;
pub use matcher::Matcher;
pub use orchestrator::{AiOrchestrator, GenerateRequest, GenerateResponse};
pub use pipeline::{
    AbortReason, EngineDeps, EngineSettings, NarrativeEngine, Progress, ReplyMeta, ReplyPayload,
    TurnAction, TurnHooks, TurnOutcome, TurnPayload, validator_from_config,
};
pub use rules::{GlobalRules, ResolvedRules, RuleContextResolver, RuleLayer, RuleStack, UserRef};
pub use setup::{
    InitializerError, InitializerInput, SeedContact, SeedMoment, SeedPayload, SetupAssistant,
    WalletEvent,
};
pub use world_driver::{DriverDecision, WorldDriver};
