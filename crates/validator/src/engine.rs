//! Output validation engine.
//!
//! The engine evaluates a narrator reply against the compiled rule table,
//! then against its channel's structure, and returns a [`Verdict`]. Checks
//! run as a cascade; the first failing check decides the reason.

use crate::channel;
use crate::model::{RejectReason, Rule, RuleSet};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use ringtale_core::provider::Channel;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// The outcome of validating one reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    /// Which rule fired, or the structural check that failed.
    pub rule_name: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
            rule_name: None,
            message: String::new(),
            timestamp: Utc::now(),
        }
    }

    fn reject(reason: RejectReason, rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            rule_name: Some(rule_name.into()),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the turn's metadata should carry `refusal = true`.
    pub fn is_refusal(&self) -> bool {
        self.reason.is_some_and(|r| r.is_refusal())
    }
}

/// An entry in the rejection log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionLogEntry {
    pub window_id: String,
    pub channel: Channel,
    pub verdict: Verdict,
}

/// Maximum rejection log entries kept in memory.
const MAX_REJECTION_LOG: usize = 1_000;

struct CompiledRule {
    name: String,
    reason: RejectReason,
    regex: Regex,
}

/// Thread-safe narrator output validator.
pub struct OutputValidator {
    rules: RwLock<Vec<CompiledRule>>,
    log: RwLock<Vec<RejectionLogEntry>>,
}

impl OutputValidator {
    /// Compile a rule set. Fails on the first invalid pattern.
    pub fn new(rule_set: RuleSet) -> Result<Self, crate::ValidatorError> {
        let compiled = Self::compile(&rule_set)?;
        debug!(rules = compiled.len(), "Output validator compiled");
        Ok(Self {
            rules: RwLock::new(compiled),
            log: RwLock::new(Vec::new()),
        })
    }

    /// A validator with structural checks only.
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            log: RwLock::new(Vec::new()),
        }
    }

    /// Replace the rule table.
    pub fn reload(&self, rule_set: RuleSet) -> Result<(), crate::ValidatorError> {
        let compiled = Self::compile(&rule_set)?;
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = compiled;
        info!("Validator rules reloaded");
        Ok(())
    }

    /// Add a rule at runtime.
    pub fn add_rule(&self, rule: Rule) -> Result<(), crate::ValidatorError> {
        rule.validate()?;
        let compiled = compile_rule(&rule)?;
        self.rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(compiled);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Validate a (sanitized) reply for `channel`.
    pub fn validate(&self, text: &str, channel: Channel) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::reject(RejectReason::Empty, "empty", "reply is empty");
        }

        {
            let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
            for reason in RejectReason::CASCADE {
                if let Some(rule) = rules
                    .iter()
                    .filter(|r| r.reason == reason)
                    .find(|r| r.regex.is_match(text))
                {
                    return Verdict::reject(
                        reason,
                        rule.name.clone(),
                        format!("matched rule '{}'", rule.name),
                    );
                }
            }
        }

        match channel::check_structure(text, channel) {
            Ok(()) => Verdict::accept(),
            Err(problem) => Verdict::reject(
                RejectReason::MalformedChannel,
                format!("channel:{}", channel.as_str()),
                problem,
            ),
        }
    }

    /// Validate and record rejections in the log.
    pub fn validate_for(&self, window_id: &str, text: &str, channel: Channel) -> Verdict {
        let verdict = self.validate(text, channel);
        if !verdict.accepted {
            warn!(
                window = %window_id,
                channel = channel.as_str(),
                reason = ?verdict.reason,
                rule = ?verdict.rule_name,
                "Narrator output rejected"
            );
            let mut log = self.log.write().unwrap_or_else(|e| e.into_inner());
            if log.len() >= MAX_REJECTION_LOG {
                log.drain(..MAX_REJECTION_LOG / 10);
            }
            log.push(RejectionLogEntry {
                window_id: window_id.to_string(),
                channel,
                verdict: verdict.clone(),
            });
        }
        verdict
    }

    /// Rejections recorded so far.
    pub fn log(&self) -> Vec<RejectionLogEntry> {
        self.log.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ── Internal ───────────────────────────────────────────────────

    fn compile(set: &RuleSet) -> Result<Vec<CompiledRule>, crate::ValidatorError> {
        set.validate()?;
        set.rules
            .iter()
            .filter(|r| r.enabled)
            .map(compile_rule)
            .collect()
    }
}

fn compile_rule(rule: &Rule) -> Result<CompiledRule, crate::ValidatorError> {
    let pattern = if rule.literal {
        format!("(?i){}", regex_lite::escape(&rule.pattern))
    } else {
        format!("(?i){}", rule.pattern)
    };
    let regex = Regex::new(&pattern).map_err(|e| crate::ValidatorError::InvalidPattern {
        name: rule.name.clone(),
        detail: e.to_string(),
    })?;
    Ok(CompiledRule {
        name: rule.name.clone(),
        reason: rule.reason,
        regex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_core::language::Language;
    use ringtale_core::markers::{self, section};

    fn validator() -> OutputValidator {
        OutputValidator::new(RuleSet::builtin(Language::Zh, Language::En)).unwrap()
    }

    const CHANNELS: [Channel; 4] = [Channel::Story, Channel::Wechat, Channel::Call, Channel::Moment];

    #[test]
    fn clean_story_is_accepted() {
        let v = validator().validate("雨停了，他把伞收起来，看向你。", Channel::Story);
        assert!(v.accepted);
        assert!(v.reason.is_none());
    }

    #[test]
    fn section_label_leak_rejected_on_every_channel() {
        let v = validator();
        for channel in CHANNELS {
            for label in section::ALL {
                let text = format!("{}\n{label} 他笑了。\n{}", markers::CALL_START, markers::CALL_END);
                let verdict = v.validate(&text, channel);
                assert!(!verdict.accepted, "{label} on {channel:?}");
                assert_eq!(verdict.reason, Some(RejectReason::PromptLeak));
            }
        }
    }

    #[test]
    fn debug_marker_leak_rejected() {
        let v = validator().validate("他说：好。 requestId=abc", Channel::Story);
        assert_eq!(v.reason, Some(RejectReason::PromptLeak));
    }

    #[test]
    fn refusals_in_target_and_fallback_language() {
        let v = validator();
        let zh = v.validate("抱歉，我无法继续这个故事。", Channel::Story);
        assert_eq!(zh.reason, Some(RejectReason::Refusal));
        assert!(zh.is_refusal());
        let en = v.validate("I'm sorry, but as an AI I cannot continue.", Channel::Story);
        assert_eq!(en.reason, Some(RejectReason::Refusal));
    }

    #[test]
    fn meta_narration_rejected() {
        let v = validator().validate("（作者注：下一章会更精彩）", Channel::Story);
        assert_eq!(v.reason, Some(RejectReason::MetaNarration));
        assert!(!v.is_refusal());
    }

    #[test]
    fn in_story_apologies_and_books_are_not_rejected() {
        let v = validator();
        for text in [
            "林低下头：对不起，我不能陪你了。",
            "我不能继续等你了，雨太大。",
            "她是书店的老读者，翻到第三章时停住了。",
            "下一章的标题被人撕掉了。",
            "He handed the letter to the reader at the desk.",
            "\"I'm sorry, but I have to go,\" she said.",
            "\"I can't help it,\" he laughed. \"I won't write to you again.\"",
            "The author of the note had signed only with an initial.",
        ] {
            let verdict = v.validate(text, Channel::Story);
            assert!(verdict.accepted, "{text}: {:?} ({:?})", verdict.reason, verdict.rule_name);
        }
    }

    #[test]
    fn assistant_style_refusals_still_caught() {
        let v = validator();
        for text in [
            "抱歉，我无法提供这类内容。",
            "我不能继续这个角色扮演。",
            "I can't continue this story.",
            "I'm sorry, but I can't comply with that.",
        ] {
            assert_eq!(v.validate(text, Channel::Story).reason, Some(RejectReason::Refusal), "{text}");
        }
        for text in ["亲爱的读者，故事还没结束。", "本章完", "Dear reader, bear with me."] {
            assert_eq!(
                v.validate(text, Channel::Story).reason,
                Some(RejectReason::MetaNarration),
                "{text}"
            );
        }
    }

    #[test]
    fn configured_patterns_match_case_insensitively() {
        let v = OutputValidator::empty();
        v.add_rule(Rule::new("no-ooc", r"\(ooc", RejectReason::MetaNarration))
            .unwrap();
        v.add_rule(Rule::literal("leak", "[debug]", RejectReason::PromptLeak))
            .unwrap();
        assert_eq!(v.validate("(OOC: brb)", Channel::Story).reason, Some(RejectReason::MetaNarration));
        assert_eq!(v.validate("他笑了 [DEBUG]", Channel::Story).reason, Some(RejectReason::PromptLeak));
    }

    #[test]
    fn leak_wins_over_refusal() {
        let v = validator().validate("【SYSTEM RULES】作为AI我不能", Channel::Story);
        assert_eq!(v.reason, Some(RejectReason::PromptLeak));
    }

    #[test]
    fn call_without_end_marker_is_malformed_refusal() {
        let text = "[CALL_START]\n[CALL] 林：喂？\n[CALL] 林：你还在吗？";
        let v = validator().validate(text, Channel::Call);
        assert_eq!(v.reason, Some(RejectReason::MalformedChannel));
        assert!(v.is_refusal());
    }

    #[test]
    fn empty_reply_is_rejected() {
        let v = validator().validate("   \n", Channel::Story);
        assert_eq!(v.reason, Some(RejectReason::Empty));
    }

    #[test]
    fn runtime_rule_and_reload() {
        let v = OutputValidator::empty();
        assert!(v.validate("banana", Channel::Story).accepted);
        v.add_rule(Rule::new("no-banana", "(?i)banana", RejectReason::MetaNarration))
            .unwrap();
        assert!(!v.validate("BANANA", Channel::Story).accepted);
        v.reload(RuleSet::new()).unwrap();
        assert_eq!(v.active_count(), 0);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut set = RuleSet::new();
        set.add(Rule::new("broken", "(unclosed", RejectReason::Refusal));
        assert!(matches!(
            OutputValidator::new(set),
            Err(crate::ValidatorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut rule = Rule::new("x", "x", RejectReason::Refusal);
        rule.enabled = false;
        let mut set = RuleSet::new();
        set.add(rule);
        assert_eq!(OutputValidator::new(set).unwrap().active_count(), 0);
    }

    #[test]
    fn rejections_are_logged() {
        let v = validator();
        v.validate_for("win-a", "作为AI，我不能。", Channel::Story);
        v.validate_for("win-a", "他笑了。", Channel::Story);
        let log = v.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].window_id, "win-a");
    }
}
