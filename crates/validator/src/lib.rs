//! Narrator output validation.
//!
//! Every narrator reply is untrusted. Before it reaches the player it is
//! sanitized, then classified by a declarative rule table and checked
//! against its channel's structure:
//!
//! ```text
//! raw reply ──▶ sanitize ──▶ leak? ──▶ refusal? ──▶ meta? ──▶ channel shape? ──▶ Verdict
//! ```
//!
//! The first failing check decides the [`RejectReason`]. Rejected replies
//! are replaced by a placeholder and never enter memory.
//!
//! # Extra rules
//!
//! ```toml
//! [[rules]]
//! name = "no-ooc"
//! pattern = "\\(OOC"
//! reason = "meta_narration"
//! ```

mod channel;
mod engine;
mod model;

pub use channel::{CallLine, CallTranscript, check_structure, fold_title, parse_call, sanitize};
pub use engine::{OutputValidator, RejectionLogEntry, Verdict};
pub use model::{RejectReason, Rule, RuleSet};

pub type ValidatorResult<T> = std::result::Result<T, ValidatorError>;

/// Errors from building a validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("pattern error in rule '{name}': {detail}")]
    InvalidPattern { name: String, detail: String },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
