//! `ringtale status`: Show configuration, routing and known windows.

use super::{CmdResult, Runtime};
use ringtale_core::provider::TurnRole;
use ringtale_narrative::validator_from_config;

pub async fn run() -> CmdResult {
    let rt = Runtime::open()?;
    let config = &rt.config;
    let overrides = rt.settings.route_overrides();

    println!("Ringtale Status");
    println!("===============");
    println!("  Config dir:   {}", ringtale_config::AppConfig::config_dir().display());
    println!("  Language:     {} (fallback {})", config.language.code(), config.fallback_language.code());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Memory:       {} at {}", config.memory.backend, config.memory.store_path().display());
    println!("  Raw cache:    {} replies", config.memory.raw_cache_limit);
    println!("  LTM at:       {} chars of STM", config.memory.ltm_threshold);
    println!("  Timeout:      {}s", config.generation.request_timeout_secs);

    println!("\n  Routes:");
    for role in TurnRole::ALL {
        let (mut provider, mut model) = config.route(role);
        if let Some(p) = &overrides.provider {
            provider = p.clone();
        }
        if role == TurnRole::Story
            && let Some(m) = &overrides.story_model
        {
            model = m.clone();
        }
        println!("    {:<12} {provider} / {model}", role.as_str());
    }

    match validator_from_config(config) {
        Ok(v) => println!("\n  Validator:    {} active rules", v.active_count()),
        Err(e) => println!("\n  ⚠️  Validator rules invalid: {e}"),
    }

    let windows = rt.memory.known_windows();
    println!("  Windows:      {}", windows.len());
    for window in windows {
        let card = rt.cards.bound_card_id(&window).unwrap_or_else(|| "(unbound)".into());
        println!("    {:<20} {card}", window.as_str());
    }

    let config_path = ringtale_config::AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `ringtale onboard` first");
    }

    Ok(())
}
