//! Structural markers shared by prompt assembly and output validation.
//!
//! Prompt sections are labelled with these strings; a reply that reproduces
//! any of them verbatim has leaked its prompt.

/// Section labels used when assembling prompts.
pub mod section {
    pub const GUARDRAIL: &str = "【GUARDRAIL】";
    pub const SYSTEM_RULES: &str = "【SYSTEM RULES】";
    pub const USER_PERSONA: &str = "【USER PERSONA】";
    pub const LONG_TERM_MEMORY: &str = "【LONG-TERM MEMORY】";
    pub const SHORT_TERM_MEMORY: &str = "【SHORT-TERM MEMORY】";
    pub const PERSONA_MEMORY: &str = "【PERSONA MEMORY】";
    pub const RECENT_REPLIES: &str = "【RECENT REPLIES】";
    pub const MATCHER_NOTES: &str = "【MATCHER NOTES】";
    pub const PENDING_EVENTS: &str = "【OFFSCREEN EVENTS】";
    pub const OPENING: &str = "【OPENING】";
    pub const CHANNEL: &str = "【OUTPUT CHANNEL】";
    pub const USER_INPUT: &str = "【USER INPUT】";

    /// Every section label, for leak detection.
    pub const ALL: [&str; 12] = [
        GUARDRAIL,
        SYSTEM_RULES,
        USER_PERSONA,
        LONG_TERM_MEMORY,
        SHORT_TERM_MEMORY,
        PERSONA_MEMORY,
        RECENT_REPLIES,
        MATCHER_NOTES,
        PENDING_EVENTS,
        OPENING,
        CHANNEL,
        USER_INPUT,
    ];
}

/// Debug markers that must never reach the player.
pub const DEBUG_MARKERS: [&str; 6] = [
    "windowId=",
    "requestId=",
    "<<SYS>>",
    "[INST]",
    "<|im_start|>",
    "<|system|>",
];

/// Call channel: transcript opener.
pub const CALL_START: &str = "[CALL_START]";
/// Call channel: transcript closer.
pub const CALL_END: &str = "[CALL_END]";
/// Call channel: required prefix of every transcript line.
pub const CALL_LINE: &str = "[CALL]";
/// Moment channel: required leading tag.
pub const MOMENT: &str = "[MOMENT]";
