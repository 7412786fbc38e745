//! Target language and script detection.
//!
//! Summaries and replies must stay in the window's language. Detection is a
//! per-character script census, which is enough to catch a model that
//! switched languages mid-story.

use serde::{Deserialize, Serialize};

/// Languages the pipeline can lock a window to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
    Ja,
    Ko,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::Ja => "ja",
            Language::Ko => "ko",
        }
    }

    /// Name used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Zh => "Simplified Chinese",
            Language::En => "English",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "cn" | "chinese" => Some(Language::Zh),
            "en" | "en-us" | "english" => Some(Language::En),
            "ja" | "jp" | "japanese" => Some(Language::Ja),
            "ko" | "kr" | "korean" => Some(Language::Ko),
            _ => None,
        }
    }

    fn accepts(&self, script: Script) -> bool {
        match self {
            Language::Zh => script == Script::Han,
            Language::En => script == Script::Latin,
            Language::Ja => matches!(script, Script::Han | Script::Kana),
            Language::Ko => matches!(script, Script::Hangul | Script::Han),
        }
    }
}

/// Coarse writing-system classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Han,
    Kana,
    Hangul,
    Cyrillic,
    Other,
}

/// Classify a letter. Digits, punctuation and whitespace return `None`.
pub fn script_of(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    let script = match c as u32 {
        0x0041..=0x024F => Script::Latin,
        0x0400..=0x04FF => Script::Cyrillic,
        0x3040..=0x30FF | 0x31F0..=0x31FF => Script::Kana,
        0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF => Script::Hangul,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF => Script::Han,
        _ => Script::Other,
    };
    Some(script)
}

/// Share of letters (0.0–1.0) written in a script the language does not use.
/// Text with no letters scores 0.0.
pub fn foreign_ratio(text: &str, language: Language) -> f32 {
    let mut letters = 0usize;
    let mut foreign = 0usize;
    for script in text.chars().filter_map(script_of) {
        letters += 1;
        if !language.accepts(script) {
            foreign += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        foreign as f32 / letters as f32
    }
}

/// Whether more than half of the letters are in a foreign script.
pub fn is_mostly_foreign(text: &str, language: Language) -> bool {
    foreign_ratio(text, language) > 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_text_is_native_for_zh() {
        assert!(!is_mostly_foreign("他们在雨夜的车站重逢。", Language::Zh));
        assert!(is_mostly_foreign("They met again at the station.", Language::Zh));
    }

    #[test]
    fn english_allows_sparse_han() {
        assert!(!is_mostly_foreign("They ate 饺子 together at dawn.", Language::En));
    }

    #[test]
    fn japanese_accepts_kana_and_han() {
        assert!(!is_mostly_foreign("駅で待っていた。", Language::Ja));
    }

    #[test]
    fn letterless_text_is_not_foreign() {
        assert_eq!(foreign_ratio("12345 ...", Language::En), 0.0);
    }

    #[test]
    fn parse_codes() {
        assert_eq!(Language::parse("EN"), Some(Language::En));
        assert_eq!(Language::parse("zh-CN"), Some(Language::Zh));
        assert_eq!(Language::parse("xx"), None);
    }
}
