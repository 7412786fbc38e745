//! `ringtale card`: Import, list and bind character cards.

use super::{CmdResult, Runtime};
use clap::Subcommand;
use ringtale_core::character::{Card, CharacterStore};
use ringtale_core::window::WindowId;
use std::path::Path;

#[derive(Subcommand)]
pub enum CardAction {
    /// Import a card from a TOML or JSON file
    Import { path: String },

    /// List stored cards
    List,

    /// Bind a stored card to a window
    Bind {
        #[arg(short, long, default_value = "default")]
        window: String,
        card_id: String,
    },
}

pub async fn run(action: CardAction) -> CmdResult {
    let rt = Runtime::open()?;

    match action {
        CardAction::Import { path } => {
            let card = read_card(Path::new(&path))?;
            rt.cards.upsert(&card)?;
            println!("✅ Imported card '{}' ({})", card.id, card.name);
            let empty = card.empty_fields();
            if !empty.is_empty() {
                println!("   Empty fields: {}", empty.join(", "));
            }
        }
        CardAction::List => {
            let cards = rt.cards.list()?;
            if cards.is_empty() {
                println!("   No cards stored. Import one with `ringtale card import <file>`.");
            }
            for card in cards {
                println!("  {:<16} {}", card.id, card.name);
            }
        }
        CardAction::Bind { window, card_id } => {
            if rt.cards.get(&card_id)?.is_none() {
                return Err(format!("No card with id '{card_id}'").into());
            }
            let window = WindowId::sanitize(&window);
            rt.cards.bind(&window, &card_id)?;
            println!("✅ Bound '{card_id}' to window '{window}'");
        }
    }

    Ok(())
}

fn read_card(path: &Path) -> CmdResult<Card> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let card: Card = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };
    if card.id.trim().is_empty() {
        return Err("Card has no id".into());
    }
    Ok(card)
}
