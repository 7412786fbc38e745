//! Validator data model: the rule table that classifies narrator output.
//!
//! Rules are data: a name, a pattern and the rejection reason it signals.
//! The built-in table covers prompt leakage, refusal phrasing and
//! meta-narration; configuration can append more.

use ringtale_core::language::Language;
use ringtale_core::markers::{DEBUG_MARKERS, section};
use serde::{Deserialize, Serialize};

/// Why a narrator reply was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Prompt structure or debug markers reproduced verbatim.
    PromptLeak,
    /// The model declined or identified itself as an AI.
    Refusal,
    /// Author or reader voice commentary.
    MetaNarration,
    /// Output does not fit its channel's structure.
    MalformedChannel,
    /// Nothing left after sanitization.
    Empty,
}

impl RejectReason {
    /// Order in which the cascade evaluates reasons.
    pub const CASCADE: [RejectReason; 3] = [
        RejectReason::PromptLeak,
        RejectReason::Refusal,
        RejectReason::MetaNarration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::PromptLeak => "prompt_leak",
            RejectReason::Refusal => "refusal",
            RejectReason::MetaNarration => "meta_narration",
            RejectReason::MalformedChannel => "malformed_channel",
            RejectReason::Empty => "empty",
        }
    }

    /// Parse a reason usable in a configured rule.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "prompt_leak" => Some(RejectReason::PromptLeak),
            "refusal" => Some(RejectReason::Refusal),
            "meta_narration" => Some(RejectReason::MetaNarration),
            _ => None,
        }
    }

    /// Whether the reply counts as a refusal for the turn's metadata.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            RejectReason::Refusal | RejectReason::MalformedChannel | RejectReason::Empty
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,

    /// Regular expression, or a literal string when `literal` is set. Both
    /// match case-insensitively.
    pub pattern: String,

    pub reason: RejectReason,

    #[serde(default)]
    pub literal: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            reason,
            literal: false,
            enabled: true,
        }
    }

    pub fn literal(name: impl Into<String>, text: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            literal: true,
            ..Self::new(name, text, reason)
        }
    }

    /// Validate that the rule is well-formed.
    pub fn validate(&self) -> Result<(), crate::ValidatorError> {
        if self.name.trim().is_empty() {
            return Err(crate::ValidatorError::InvalidRule {
                name: "(empty)".into(),
                reason: "rule name cannot be empty".into(),
            });
        }
        if self.pattern.is_empty() {
            return Err(crate::ValidatorError::InvalidRule {
                name: self.name.clone(),
                reason: "pattern cannot be empty".into(),
            });
        }
        if matches!(
            self.reason,
            RejectReason::MalformedChannel | RejectReason::Empty
        ) {
            return Err(crate::ValidatorError::InvalidRule {
                name: self.name.clone(),
                reason: format!("reason '{}' is reserved for structural checks", self.reason),
            });
        }
        Ok(())
    }
}

/// An ordered rule table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rules for a target language plus a fallback language.
    pub fn builtin(target: Language, fallback: Language) -> Self {
        let mut set = Self::new();

        for label in section::ALL {
            set.add(Rule::literal(
                format!("section-label:{label}"),
                label,
                RejectReason::PromptLeak,
            ));
        }
        for marker in DEBUG_MARKERS {
            set.add(Rule::literal(
                format!("debug-marker:{marker}"),
                marker,
                RejectReason::PromptLeak,
            ));
        }
        for (name, pattern) in LEAK_PATTERNS {
            set.add(Rule::new(*name, *pattern, RejectReason::PromptLeak));
        }

        let mut languages = vec![target];
        if fallback != target {
            languages.push(fallback);
        }
        for language in languages {
            let (refusals, meta) = language_tables(language);
            for (name, pattern) in refusals {
                set.add(Rule::new(
                    format!("{}:{name}", language.code()),
                    *pattern,
                    RejectReason::Refusal,
                ));
            }
            for (name, pattern) in meta {
                set.add(Rule::new(
                    format!("{}:{name}", language.code()),
                    *pattern,
                    RejectReason::MetaNarration,
                ));
            }
        }
        set
    }

    /// Load extra rules from a TOML string (`[[rules]]` tables).
    pub fn from_toml(toml_str: &str) -> Result<Self, crate::ValidatorError> {
        let set: RuleSet = toml::from_str(toml_str)?;
        set.validate()?;
        Ok(set)
    }

    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Append every rule of `other`.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    /// Remove a rule by name. Returns `true` if found.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.rules.len() < before
    }

    pub fn validate(&self) -> Result<(), crate::ValidatorError> {
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    /// Number of enabled rules.
    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}

type Table = &'static [(&'static str, &'static str)];

/// Structural leakage independent of language.
const LEAK_PATTERNS: Table = &[
    ("role-header", r"(?m)^#{2,}\s*(system|user|assistant)\s*$"),
    ("role-tag", r"</?\s*(system|assistant|user|instruction)s?\s*>"),
    ("prompt-mention", r"(system prompt|系统提示词|系统指令)"),
];

const ZH_REFUSAL: Table = &[
    ("as-an-ai", r"作为(一个|一名)?(AI|人工智能|语言模型|AI助手|智能助手)"),
    ("i-am-ai", r"我(只)?是(一个|一名)?(AI|人工智能|语言模型|虚拟助手)"),
    (
        "sorry-cannot",
        r"(抱歉|对不起|很遗憾)[，,。！!\s]*(我)?(无法|不能|没办法)(为你|为您)?(回答|协助|满足|提供|生成)(这个|这类|这种|此类|该|你的|您的)?(问题|请求|要求|内容)",
    ),
    (
        "cannot-continue",
        r"我(无法|不能)(继续|生成|创作|撰写|提供)(这个|这段|这类|这种|此类|该)?(故事|内容|场景|角色扮演|剧情)",
    ),
    ("policy", r"(内容|安全|使用)(政策|准则|规范)"),
    ("violates", r"(违反|违背|不符合).{0,8}(政策|准则|规定|原则)"),
];

const ZH_META: Table = &[
    ("author-note", r"(作者|笔者)(注|按|的话|有话说)"),
    ("reader", r"(亲爱的|各位|广大)读者|读者朋友们|读者们[，,：:！!]"),
    (
        "chapter",
        r"本章(完|结束|未完)|(请看|敬请期待|欲知后事).{0,6}下一章|下一章(预告|见|再见)|上一章(说到|讲到|提到)",
    ),
    ("ooc", r"[（(]\s*(OOC|ooc|场外)"),
];

const EN_REFUSAL: Table = &[
    ("as-an-ai", r"(?i)\bas an? (ai|artificial intelligence|language model|ai assistant)\b"),
    ("i-am-ai", r"(?i)\bi(?:'m| am) (?:just |only )?an? (ai|language model|virtual assistant)\b"),
    (
        "cannot-help",
        r"(?i)\bi (can't|cannot|can not|won't|am unable to|'m unable to) (help with|assist with|continue|comply with|provide|create|generate|write) (this|that|such|your|the requested)( kind of| type of)? (request|content|story|roleplay|role-play|scenario|material)\b",
    ),
    (
        "sorry-but",
        r"(?i)\b(i'm|i am) sorry,? but (i can't|i cannot|i'm unable to|i am unable to|i won't be able to) (assist|comply|fulfill)\b",
    ),
    ("policy", r"(?i)\b(content|usage|safety) (policy|policies|guidelines)\b"),
    ("violates", r"(?i)\b(against|violates?) (my|the|our) (guidelines|policies|principles)\b"),
];

const EN_META: Table = &[
    ("reader", r"(?i)\b(dear|gentle|fellow) readers?\b"),
    ("author", r"(?i)(\bauthor'?s note\b|\bnote from the author\b|\ba/n:)"),
    ("chapter", r"(?i)\b(in this|in the next|in the previous|end of (the )?|to be continued in the next) chapter\b"),
    ("ooc", r"(?i)[(\[]\s*(ooc|out of character)\b"),
    ("narrator-voice", r"(?i)\bas the narrator\b"),
];

const JA_REFUSAL: Table = &[
    ("as-an-ai", r"(AI|人工知能|言語モデル)として"),
    ("sorry-cannot", r"申し訳(ありません|ございません)が.{0,12}(できません|お応えできません)"),
    ("guidelines", r"(ガイドライン|ポリシー)(に反|に違反|上)"),
];

const JA_META: Table = &[("author-note", r"(作者|筆者)(注|より)"), ("reader", r"読者(の皆|様)")];

const KO_REFUSAL: Table = &[
    ("as-an-ai", r"(AI|인공지능|언어 모델)(로서|으로서)"),
    ("sorry-cannot", r"죄송(하지만|합니다만).{0,12}(수 없|할 수 없)"),
    ("guidelines", r"(가이드라인|정책)(에 위배|상)"),
];

const KO_META: Table = &[("author-note", r"작가(의 말|노트)"), ("reader", r"독자(님|여러분)")];

fn language_tables(language: Language) -> (Table, Table) {
    match language {
        Language::Zh => (ZH_REFUSAL, ZH_META),
        Language::En => (EN_REFUSAL, EN_META),
        Language::Ja => (JA_REFUSAL, JA_META),
        Language::Ko => (KO_REFUSAL, KO_META),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_includes_every_section_label() {
        let set = RuleSet::builtin(Language::Zh, Language::En);
        for label in section::ALL {
            assert!(set.rules.iter().any(|r| r.literal && r.pattern == label));
        }
        assert!(set.rules.iter().any(|r| r.name.starts_with("zh:")));
        assert!(set.rules.iter().any(|r| r.name.starts_with("en:")));
        assert!(!set.rules.iter().any(|r| r.name.starts_with("ja:")));
    }

    #[test]
    fn same_target_and_fallback_not_duplicated() {
        let both = RuleSet::builtin(Language::En, Language::En);
        let names: std::collections::HashSet<_> = both.rules.iter().map(|r| &r.name).collect();
        assert_eq!(names.len(), both.rules.len());
    }

    #[test]
    fn rule_set_from_toml() {
        let set = RuleSet::from_toml(
            r#"
[[rules]]
name = "no-ooc"
pattern = "\\(OOC"
reason = "meta_narration"

[[rules]]
name = "banned-word"
pattern = "[system]"
reason = "prompt_leak"
literal = true
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.active_count(), 1);
        assert!(set.rules[1].literal);
    }

    #[test]
    fn structural_reasons_are_reserved() {
        let rule = Rule::new("x", "x", RejectReason::MalformedChannel);
        assert!(rule.validate().is_err());
        assert!(Rule::new("", "x", RejectReason::Refusal).validate().is_err());
    }

    #[test]
    fn reason_parse_and_refusal_flag() {
        assert_eq!(RejectReason::parse("refusal"), Some(RejectReason::Refusal));
        assert_eq!(RejectReason::parse("empty"), None);
        assert!(RejectReason::MalformedChannel.is_refusal());
        assert!(!RejectReason::PromptLeak.is_refusal());
    }

    #[test]
    fn add_remove() {
        let mut set = RuleSet::new();
        set.add(Rule::new("a", "a", RejectReason::Refusal));
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
    }
}
