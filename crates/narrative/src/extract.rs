//! Lenient JSON extraction from model output.

use serde_json::Value;

/// Find the first JSON object in `text`.
///
/// Models wrap structured answers in prose or code fences; this takes the
/// outermost `{ ... }` span and parses it.
pub fn json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// A trimmed, non-empty string field.
pub fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Whether a summary is a stand-in rather than content.
pub fn is_placeholder(text: &str) -> bool {
    const PLACEHOLDERS: [&str; 10] = [
        "...", "…", "n/a", "none", "null", "tbd", "无", "暂无", "（无）", "略",
    ];
    let t = text.trim();
    t.is_empty()
        || PLACEHOLDERS.iter().any(|p| t.eq_ignore_ascii_case(p))
        || t.contains("{{")
        || t.starts_with('<') && t.ends_with('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_object_inside_prose_and_fences() {
        let text = "Sure:\n```json\n{\"action\": \"reply_story\"}\n```";
        let map = json_object(text).unwrap();
        assert_eq!(string_field(&map, "action").as_deref(), Some("reply_story"));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(json_object("no json here").is_none());
        assert!(json_object("} backwards {").is_none());
        assert!(json_object("{not json}").is_none());
    }

    #[test]
    fn placeholders() {
        assert!(is_placeholder("  N/A "));
        assert!(is_placeholder("<world summary>"));
        assert!(is_placeholder("{{world_summary}}"));
        assert!(!is_placeholder("他们在雨夜重逢。"));
    }
}
