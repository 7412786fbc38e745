//! Channel structure checks, output sanitization and call folding.

use ringtale_core::language::Language;
use ringtale_core::markers::{CALL_END, CALL_LINE, CALL_START, MOMENT};
use ringtale_core::provider::Channel;
use serde::{Deserialize, Serialize};

/// Check that `text` fits the structure its channel demands.
///
/// Returns a human-readable description of the first problem found.
pub fn check_structure(text: &str, channel: Channel) -> Result<(), String> {
    match channel {
        Channel::Call => check_call(text),
        Channel::Moment => {
            if text.trim_start().starts_with(MOMENT) {
                Ok(())
            } else {
                Err(format!("moment reply must begin with {MOMENT}"))
            }
        }
        Channel::Story | Channel::Wechat => {
            for tag in [CALL_START, CALL_END, CALL_LINE, MOMENT] {
                if text.contains(tag) {
                    return Err(format!("{} reply contains channel tag {tag}", channel.as_str()));
                }
            }
            Ok(())
        }
    }
}

fn check_call(text: &str) -> Result<(), String> {
    let start = text
        .find(CALL_START)
        .ok_or_else(|| format!("call reply is missing {CALL_START}"))?;
    let body_from = start + CALL_START.len();
    let end = text[body_from..]
        .find(CALL_END)
        .map(|i| body_from + i)
        .ok_or_else(|| format!("call reply is missing {CALL_END}"))?;

    if text[end + CALL_END.len()..].contains(CALL_START) {
        return Err("call reply contains more than one transcript".into());
    }

    let mut lines = 0;
    for line in text[body_from..end].lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !line.starts_with(CALL_LINE) {
            return Err(format!("call line not prefixed with {CALL_LINE}: {line}"));
        }
        lines += 1;
    }
    if lines == 0 {
        return Err("call transcript is empty".into());
    }
    Ok(())
}

/// Strip model artifacts that are never part of the story: reasoning
/// blocks, a wrapping code fence and a leading speaker label.
pub fn sanitize(text: &str) -> String {
    let mut out = strip_think_blocks(text);
    out = strip_code_fence(out.trim()).to_string();
    strip_speaker_label(out.trim()).trim().to_string()
}

fn strip_think_blocks(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            // Unterminated: the model never finished thinking.
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (```text, ```markdown ...).
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim().contains(' ') => body,
        _ => inner,
    }
}

const SPEAKER_LABELS: [&str; 8] = [
    "Narrator", "narrator", "Assistant", "assistant", "旁白", "叙述者", "助手", "AI",
];

fn strip_speaker_label(text: &str) -> &str {
    for label in SPEAKER_LABELS {
        if let Some(rest) = text.strip_prefix(label) {
            let rest = rest.trim_start();
            for sep in [':', '：'] {
                if let Some(body) = rest.strip_prefix(sep) {
                    return body;
                }
            }
        }
    }
    text
}

/// A parsed call transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTranscript {
    pub lines: Vec<CallLine>,
    /// Summary label shown when the transcript is folded.
    pub fold_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLine {
    /// Empty when the line carries no `speaker:` prefix.
    pub speaker: String,
    pub text: String,
}

/// Parse an accepted call reply. Returns `None` when the structure is
/// invalid.
pub fn parse_call(text: &str, caller: &str, language: Language) -> Option<CallTranscript> {
    check_call(text).ok()?;
    let start = text.find(CALL_START)? + CALL_START.len();
    let end = start + text[start..].find(CALL_END)?;

    let lines = text[start..end]
        .lines()
        .map(str::trim)
        .filter_map(|l| l.strip_prefix(CALL_LINE))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(split_speaker)
        .collect();

    Some(CallTranscript {
        lines,
        fold_title: fold_title(caller, language),
    })
}

fn split_speaker(line: &str) -> CallLine {
    let split = line
        .char_indices()
        .find(|(_, c)| *c == '：' || *c == ':')
        .filter(|(i, _)| line[..*i].chars().count() <= 16);
    match split {
        Some((i, c)) => CallLine {
            speaker: line[..i].trim().to_string(),
            text: line[i + c.len_utf8()..].trim().to_string(),
        },
        None => CallLine {
            speaker: String::new(),
            text: line.to_string(),
        },
    }
}

/// The folded-transcript title for a call with `caller`.
pub fn fold_title(caller: &str, language: Language) -> String {
    let caller = caller.trim();
    match (language, caller.is_empty()) {
        (Language::Zh, false) => format!("与{caller}的通话"),
        (Language::Zh, true) => "通话记录".into(),
        (Language::En, false) => format!("Call with {caller}"),
        (Language::En, true) => "Call transcript".into(),
        (Language::Ja, false) => format!("{caller}との通話"),
        (Language::Ja, true) => "通話記録".into(),
        (Language::Ko, false) => format!("{caller}와의 통화"),
        (Language::Ko, true) => "통화 기록".into(),
    }
}
