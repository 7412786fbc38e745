//! `ringtale memory`: Inspect and edit a window's memory tiers.

use super::{CmdResult, Runtime};
use clap::Subcommand;
use ringtale_core::window::WindowContext;
use ringtale_narrative::MemoryInspector;

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Show every tier of a window
    Show {
        #[arg(short, long, default_value = "default")]
        window: String,
    },

    /// Replace the short-term memory
    SetStm {
        #[arg(short, long, default_value = "default")]
        window: String,
        text: String,
    },

    /// Replace the long-term memory
    SetLtm {
        #[arg(short, long, default_value = "default")]
        window: String,
        text: String,
    },

    /// Replace the persona memory
    SetPersona {
        #[arg(short, long, default_value = "default")]
        window: String,
        text: String,
    },

    /// Set how many raw replies are kept (1-20)
    SetRawLimit {
        #[arg(short, long, default_value = "default")]
        window: String,
        limit: usize,
    },

    /// Clear memory tiers and the raw cache
    Reset {
        #[arg(short, long, default_value = "default")]
        window: String,

        /// Required to actually reset
        #[arg(long)]
        confirm: bool,
    },
}

impl MemoryAction {
    fn window(&self) -> &str {
        match self {
            MemoryAction::Show { window }
            | MemoryAction::SetStm { window, .. }
            | MemoryAction::SetLtm { window, .. }
            | MemoryAction::SetPersona { window, .. }
            | MemoryAction::SetRawLimit { window, .. }
            | MemoryAction::Reset { window, .. } => window,
        }
    }
}

pub async fn run(action: MemoryAction) -> CmdResult {
    let rt = Runtime::open()?;
    let window = action.window().to_string();
    let inspector = MemoryInspector::new(WindowContext::new(&window), rt.memory.clone());

    match action {
        MemoryAction::Show { .. } => show(&inspector, &window)?,
        MemoryAction::SetStm { text, .. } => {
            inspector.set_stm(&window, &text)?;
            println!("✅ STM updated ({} chars)", text.chars().count());
        }
        MemoryAction::SetLtm { text, .. } => {
            inspector.set_ltm(&window, &text)?;
            println!("✅ LTM updated ({} chars)", text.chars().count());
        }
        MemoryAction::SetPersona { text, .. } => {
            inspector.set_persona(&window, &text)?;
            println!("✅ Persona memory updated ({} chars)", text.chars().count());
        }
        MemoryAction::SetRawLimit { limit, .. } => {
            let applied = inspector.set_raw_cache_limit(&window, limit)?;
            if applied != limit {
                println!("⚠️  Limit clamped to {applied}");
            }
            println!("✅ Raw cache keeps {applied} replies");
        }
        MemoryAction::Reset { confirm, .. } => {
            if !confirm {
                println!("⚠️  This clears STM, LTM, persona memory and recent replies of '{window}'.");
                println!("   Run with --confirm to proceed:");
                println!("   ringtale memory reset --window {window} --confirm");
                return Ok(());
            }
            inspector.reset(&window)?;
            println!("✅ Memory of '{window}' reset.");
        }
    }

    Ok(())
}

fn show(inspector: &MemoryInspector, window: &str) -> CmdResult {
    let state = inspector.snapshot(window)?;

    println!("🧠 Memory of '{window}'");
    println!("====================");
    println!(
        "  Flags:      stm_auto={} ltm_auto={} persona_auto={} matcher={}",
        state.stm_auto, state.ltm_auto, state.persona_auto, state.matcher_enabled
    );
    println!("  First turn: {}", state.is_first_turn);
    println!("  Raw cache:  {}/{}", state.raw_cache.len(), state.raw_cache_limit);
    println!("  Pending:    {} events", state.pending_events.len());

    for (label, text) in [("STM", &state.stm), ("LTM", &state.ltm), ("Persona", &state.persona)] {
        println!("\n  [{label}] {} chars", text.chars().count());
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            println!("    {line}");
        }
    }

    if !state.raw_cache.is_empty() {
        println!("\n  [Recent replies]");
        for (i, reply) in state.raw_cache.iter().enumerate() {
            let preview: String = reply.chars().take(80).collect();
            println!("  {:>2}. {preview}", i + 1);
        }
    }

    Ok(())
}
