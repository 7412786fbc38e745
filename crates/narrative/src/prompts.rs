//! Prompt assembly for every turn shape.
//!
//! Narrator context is built from labelled sections in a fixed order; the
//! labels are the same strings the output validator treats as leakage.

use crate::rules::ResolvedRules;
use ringtale_core::character::Card;
use ringtale_core::language::Language;
use ringtale_core::markers::{self, section};
use ringtale_core::message::Message;
use ringtale_core::provider::Channel;
use ringtale_core::world::MomentRef;
use ringtale_memory::WindowMemoryState;

/// Everything the narrator prompt is assembled from.
pub struct NarratorContext<'a> {
    pub rules: &'a ResolvedRules,
    pub memory: &'a WindowMemoryState,
    pub matcher_notes: Option<&'a str>,
    pub channel: Channel,
    pub language: Language,
    pub user_input: &'a str,
}

/// Build the narrator message list: one system message, one user message.
pub fn narrator_messages(ctx: &NarratorContext<'_>) -> Vec<Message> {
    let mut system = ctx.rules.system_prompt.clone();
    system.push_str(&format!(
        "\n\n{}\n{}",
        section::CHANNEL,
        channel_constraint(ctx.channel)
    ));

    let mem = ctx.memory;
    let mut sections: Vec<(&str, String)> = vec![(section::USER_PERSONA, strip_label(&ctx.rules.user_persona_prompt))];
    push_section(&mut sections, section::LONG_TERM_MEMORY, &mem.ltm);
    push_section(&mut sections, section::PERSONA_MEMORY, &mem.persona);
    push_section(&mut sections, section::SHORT_TERM_MEMORY, &mem.stm);
    push_section(&mut sections, section::RECENT_REPLIES, &numbered(&mem.raw_cache));
    if let Some(notes) = ctx.matcher_notes {
        push_section(&mut sections, section::MATCHER_NOTES, notes);
    }
    let pending: Vec<String> = mem
        .pending_events
        .iter()
        .map(|e| format!("- [{}] {}", e.kind, e.summary))
        .collect();
    push_section(&mut sections, section::PENDING_EVENTS, &pending.join("\n"));
    if mem.is_first_turn {
        push_section(&mut sections, section::OPENING, &mem.opening_text);
    }
    push_section(&mut sections, section::USER_INPUT, ctx.user_input);

    let user = sections
        .into_iter()
        .map(|(label, body)| format!("{label}\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![Message::system(system), Message::user(user)]
}

/// Output-shape instructions for a channel.
pub fn channel_constraint(channel: Channel) -> String {
    match channel {
        Channel::Story => format!(
            "Write the next passage of story prose. Do not use {} or {} tags.",
            markers::CALL_LINE,
            markers::MOMENT
        ),
        Channel::Wechat => {
            "Write one instant message exactly as the character would type it. No narration and no tags.".to_string()
        }
        Channel::Call => format!(
            "Write the phone call as a transcript. The first line is {}, the last line is {}, and every line in between starts with {} followed by `speaker: words`.",
            markers::CALL_START,
            markers::CALL_END,
            markers::CALL_LINE
        ),
        Channel::Moment => format!(
            "Write one social post by the character. Begin with {} followed by the post text.",
            markers::MOMENT
        ),
    }
}

/// Short-term memory regeneration.
pub fn stm_messages(
    previous: &str,
    raw_replies: &[String],
    user_inputs: &[String],
    language: Language,
) -> Vec<Message> {
    let system = format!(
        "You maintain the short-term memory of an ongoing story. Write in {}. \
         Merge the previous memory with the new events into one compact paragraph of plain third-person summary. \
         Never quote dialogue, never write in a character's voice, never use quotation marks, headings or tags. \
         Output only the summary.",
        language.display_name()
    );
    let user = format!(
        "Previous memory:\n{}\n\nRecent story:\n{}\n\nRecent player inputs:\n{}",
        or_none(previous),
        or_none(&numbered(raw_replies)),
        or_none(&numbered(user_inputs)),
    );
    vec![Message::system(system), Message::user(user)]
}

/// Long-term memory consolidation. Expects a JSON object back.
pub fn ltm_messages(stm: &str, persona: &str, language: Language) -> Vec<Message> {
    let system = format!(
        "You consolidate story memory. Write in {}. Answer with one JSON object and nothing else: \
         {{\"world_summary\": \"durable facts about the world, places and relationships\", \
         \"persona_summary\": \"durable facts about the player's character\"}}.",
        language.display_name()
    );
    let user = format!(
        "Short-term memory:\n{}\n\nCurrent persona memory:\n{}",
        stm.trim(),
        or_none(persona)
    );
    vec![Message::system(system), Message::user(user)]
}

/// Matcher turn: relevance notes for the current input.
pub fn matcher_messages(user_input: &str, ltm: &str, persona: &str, language: Language) -> Vec<Message> {
    let system = format!(
        "You look up story memory. Write in {}. List at most three short facts from the memory that matter for the player's input, one per line. \
         If nothing matters, answer NONE.",
        language.display_name()
    );
    let user = format!(
        "Memory:\n{}\n\nPersona:\n{}\n\nPlayer input:\n{}",
        or_none(ltm),
        or_none(persona),
        user_input.trim()
    );
    vec![Message::system(system), Message::user(user)]
}

/// What the world driver classifies a turn over.
pub struct DriverContext<'a> {
    pub rules: &'a ResolvedRules,
    pub memory: &'a WindowMemoryState,
    /// Thread ids a message may be sent to.
    pub threads: &'a [String],
    /// Moments that may be commented on.
    pub moments: &'a [MomentRef],
    pub language: Language,
    pub user_input: &'a str,
}

/// World-driver classification. Side-effect targets must come from the
/// listed threads and moments.
pub fn driver_messages(ctx: &DriverContext<'_>) -> Vec<Message> {
    let system = format!(
        "You decide what happens next on the player's phone. Write any text in {}. \
         Answer with one JSON object and nothing else. Choose exactly one action:\n\
         {{\"action\": \"reply_story\"}}\n\
         {{\"action\": \"send_wechat\", \"thread_id\": \"...\", \"text\": \"...\"}}\n\
         {{\"action\": \"incoming_call\", \"caller\": \"...\", \"script\": [\"...\"]}}\n\
         {{\"action\": \"add_moment_comment\", \"moment_id\": \"...\", \"text\": \"...\"}}\n\
         thread_id and moment_id must be copied from the lists below. When unsure, choose reply_story.",
        ctx.language.display_name()
    );

    let mem = ctx.memory;
    let user_ref = &ctx.rules.user_ref;
    let character = ctx.rules.card.as_ref().map(|c| c.name.as_str()).unwrap_or_default();
    let moments: Vec<String> = ctx
        .moments
        .iter()
        .map(|m| format!("- {} (by {})", m.id, or_none(&m.author)))
        .collect();
    let user = [
        ("Character", or_none(character).to_string()),
        ("Rules", or_none(&ctx.rules.system_prompt).to_string()),
        (
            "Player",
            format!(
                "{} (addressed as {})",
                or_none(&user_ref.name),
                user_ref.address_word(ctx.language)
            ),
        ),
        ("Player persona", or_none(&strip_label(&ctx.rules.user_persona_prompt)).to_string()),
        ("Long-term memory", or_none(&mem.ltm).to_string()),
        ("Persona memory", or_none(&mem.persona).to_string()),
        ("Short-term memory", or_none(&mem.stm).to_string()),
        (
            "Last story beat",
            or_none(mem.raw_cache.last().map(String::as_str).unwrap_or_default()).to_string(),
        ),
        ("Message threads", or_none(&ctx.threads.join(", ")).to_string()),
        ("Moments", or_none(&moments.join("\n")).to_string()),
        ("Player input", ctx.user_input.trim().to_string()),
    ]
    .into_iter()
    .map(|(label, body)| format!("{label}:\n{body}"))
    .collect::<Vec<_>>()
    .join("\n\n");

    vec![Message::system(system), Message::user(user)]
}

/// Setup assistant: fill only the listed empty card fields.
pub fn setup_messages(card: &Card, preference: &str, fields: &[&str], language: Language) -> Vec<Message> {
    let system = format!(
        "You help write a character card. Write in {}. Answer with one JSON object whose keys are exactly: {}. \
         Every value is a string. Stay consistent with the existing fields.",
        language.display_name(),
        fields.join(", ")
    );
    let user = format!(
        "Existing fields:\n{}\n\nThe player wants:\n{}",
        or_none(&card.declaration()),
        or_none(preference)
    );
    vec![Message::system(system), Message::user(user)]
}

/// Window initializer: seed the phone for a fresh window.
pub fn initializer_messages(
    card: &Card,
    user_persona: &str,
    opening_text: &str,
    allow_flag: bool,
    language: Language,
) -> Vec<Message> {
    let social = if allow_flag {
        "Include 2-4 contacts and 1-3 moments that fit the world."
    } else {
        "Leave contacts and moments empty."
    };
    let system = format!(
        "You prepare a new story on a simulated phone. Write in {}. Answer with one JSON object and nothing else: \
         {{\"contacts\": [{{\"name\": \"\", \"relation\": \"\", \"note\": \"\"}}], \
         \"moments\": [{{\"author\": \"\", \"text\": \"\"}}], \
         \"wallet_event\": {{\"amount\": 0, \"memo\": \"\"}} or null, \
         \"persona_patch\": \"\"}}. {social}",
        language.display_name()
    );
    let user = format!(
        "Character:\n{}\n\nPlayer persona:\n{}\n\nOpening:\n{}",
        or_none(&card.declaration()),
        or_none(user_persona),
        or_none(opening_text)
    );
    vec![Message::system(system), Message::user(user)]
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn push_section<'a>(sections: &mut Vec<(&'a str, String)>, label: &'a str, body: &str) {
    let body = body.trim();
    if !body.is_empty() {
        sections.push((label, body.to_string()));
    }
}

/// The resolved persona already carries its label as the first line.
fn strip_label(prompt: &str) -> String {
    prompt
        .strip_prefix(section::USER_PERSONA)
        .unwrap_or(prompt)
        .trim()
        .to_string()
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_none(text: &str) -> &str {
    let t = text.trim();
    if t.is_empty() { "(none)" } else { t }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{GlobalRules, RuleContextResolver};
    use ringtale_core::window::WindowId;
    use ringtale_memory::{PendingEvent, WindowOverrides};

    fn rules() -> ResolvedRules {
        RuleContextResolver::new(GlobalRules::default(), Language::Zh).resolve(
            None,
            &WindowId::sanitize("win-a"),
            &WindowOverrides::default(),
        )
    }

    #[test]
    fn narrator_sections_follow_memory() {
        let rules = rules();
        let memory = WindowMemoryState {
            ltm: "They grew up together.".into(),
            raw_cache: vec!["first".into(), "second".into()],
            pending_events: vec![PendingEvent::new("wechat", "Lin texted")],
            opening_text: "Rain on the platform.".into(),
            ..WindowMemoryState::default()
        };
        let messages = narrator_messages(&NarratorContext {
            rules: &rules,
            memory: &memory,
            matcher_notes: Some("- umbrella"),
            channel: Channel::Call,
            language: Language::Zh,
            user_input: "hello",
        });
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains(section::LONG_TERM_MEMORY));
        assert!(!user.contains(section::SHORT_TERM_MEMORY));
        assert!(user.contains("2. second"));
        assert!(user.contains("[wechat] Lin texted"));
        assert!(user.contains(section::OPENING));
        assert!(user.ends_with("hello"));
        assert!(messages[0].content.contains(markers::CALL_END));
    }

    #[test]
    fn opening_only_on_first_turn() {
        let rules = rules();
        let memory = WindowMemoryState {
            opening_text: "Rain.".into(),
            is_first_turn: false,
            ..WindowMemoryState::default()
        };
        let messages = narrator_messages(&NarratorContext {
            rules: &rules,
            memory: &memory,
            matcher_notes: None,
            channel: Channel::Story,
            language: Language::Zh,
            user_input: "hi",
        });
        assert!(!messages[1].content.contains(section::OPENING));
    }

    #[test]
    fn driver_prompt_carries_memory_and_targets() {
        let rules = rules();
        let memory = WindowMemoryState {
            stm: "They argued at the station.".into(),
            ltm: "They grew up together.".into(),
            persona: "The player is afraid of the dark.".into(),
            raw_cache: vec!["Lin walked away.".into()],
            ..WindowMemoryState::default()
        };
        let threads = vec!["lin".to_string()];
        let moments = vec![MomentRef {
            id: "m1".into(),
            author: "lin".into(),
            deleted: false,
        }];
        let messages = driver_messages(&DriverContext {
            rules: &rules,
            memory: &memory,
            threads: &threads,
            moments: &moments,
            language: Language::En,
            user_input: "text her",
        });
        let user = &messages[1].content;
        for needle in [
            "They argued at the station.",
            "They grew up together.",
            "afraid of the dark",
            "Lin walked away.",
            "Message threads:\nlin",
            "- m1 (by lin)",
        ] {
            assert!(user.contains(needle), "missing {needle}");
        }
        assert!(user.contains(rules.system_prompt.trim()));
        assert!(user.ends_with("text her"));
    }

    #[test]
    fn stm_prompt_marks_missing_parts() {
        let messages = stm_messages("", &[], &["go home".into()], Language::En);
        assert!(messages[0].content.contains("English"));
        assert!(messages[1].content.contains("(none)"));
        assert!(messages[1].content.contains("1. go home"));
    }

    #[test]
    fn setup_prompt_lists_fields_without_bio() {
        let card = Card {
            id: "c".into(),
            name: "Lin".into(),
            public_bio: "BIO".into(),
            ..Card::default()
        };
        let messages = setup_messages(&card, "gentle", &["appearance", "species"], Language::Zh);
        assert!(messages[0].content.contains("appearance, species"));
        assert!(!messages[1].content.contains("BIO"));
    }
}
