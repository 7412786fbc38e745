//! `ringtale chat`: Interactive or single-message narrative turns.

use super::{CmdResult, Runtime};
use ringtale_core::character::CharacterStore;
use ringtale_core::provider::Channel;
use ringtale_core::window::WindowId;
use ringtale_narrative::{NarrativeEngine, Progress, TurnHooks, TurnOutcome, TurnPayload};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(window: &str, message: Option<String>, channel: Option<&str>, world_driver: bool) -> CmdResult {
    let rt = Runtime::open()?;
    let channel = channel.map(parse_channel).transpose()?;

    let window_id = WindowId::sanitize(window);
    let Some(card) = rt.cards.card_for_window(&window_id) else {
        eprintln!();
        eprintln!("  ERROR: No character bound to window '{window_id}'.");
        eprintln!();
        eprintln!("  Import and bind one first:");
        eprintln!("    ringtale card import lin.toml");
        eprintln!("    ringtale card bind --window {window_id} lin");
        eprintln!();
        return Err("No character bound. See above for setup instructions.".into());
    };

    let engine = rt.engine(window, world_driver)?;

    if let Some(msg) = message {
        let outcome = turn(&engine, &window_id, &msg, channel).await;
        print_outcome(&outcome, &card.name);
        engine.flush_memory().await;
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          Ringtale — Interactive Story          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Window:    {window_id}");
    println!("  Character: {} ({})", card.name, card.id);
    println!("  Provider:  {}", rt.config.default_provider);
    println!("  Driver:    {}", if world_driver { "on" } else { "off" });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if !input.is_empty() {
            let outcome = turn(&engine, &window_id, input, channel).await;
            print_outcome(&outcome, &card.name);
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    engine.flush_memory().await;
    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

async fn turn(engine: &NarrativeEngine, window: &WindowId, input: &str, channel: Option<Channel>) -> TurnOutcome {
    let mut hooks = TurnHooks::new().on_progress(|p| match p {
        Progress::Matching => eprint!("\r  matching...  "),
        Progress::Generating => eprint!("\r  writing...   "),
    });
    if let Some(channel) = channel {
        hooks = hooks.with_channel(channel);
    }
    let outcome = engine.generate_narrative_reply(input, window.as_str(), hooks).await;
    eprint!("\r               \r");
    outcome
}

fn print_outcome(outcome: &TurnOutcome, character: &str) {
    match outcome {
        TurnOutcome::Aborted { reason, .. } => {
            let reason = serde_json::to_string(reason).unwrap_or_default();
            eprintln!("  [Aborted] {}", reason.trim_matches('"'));
        }
        TurnOutcome::Completed {
            payload: TurnPayload::Reply(reply),
            ..
        } => {
            println!();
            if let (Some(title), Some(lines)) = (&reply.meta.call_fold_title, &reply.meta.call_transcript) {
                println!("  📞 {title}");
                for line in lines {
                    println!("     {}: {}", line.speaker, line.text);
                }
            } else {
                for line in reply.text.lines() {
                    println!("  {character} > {line}");
                }
            }
            if reply.meta.bad_output {
                let reason = reply.meta.reject_reason.map(|r| r.as_str()).unwrap_or("unknown");
                eprintln!("  (reply replaced: {reason})");
            }
            if !reply.meta.leaked_windows.is_empty() {
                eprintln!("  (mentions other windows: {})", reply.meta.leaked_windows.join(", "));
            }
            println!();
        }
        TurnOutcome::Completed {
            payload: TurnPayload::Action(decision),
            ..
        } => {
            let json = serde_json::to_string(decision).unwrap_or_default();
            println!();
            println!("  📱 [{}] {json}", decision.action_name());
            println!();
        }
    }
}

fn parse_channel(name: &str) -> CmdResult<Channel> {
    match name.trim().to_ascii_lowercase().as_str() {
        "story" => Ok(Channel::Story),
        "wechat" => Ok(Channel::Wechat),
        "call" => Ok(Channel::Call),
        "moment" => Ok(Channel::Moment),
        other => Err(format!("Unknown channel '{other}' (story, wechat, call, moment)").into()),
    }
}
