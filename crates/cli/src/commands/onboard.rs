//! `ringtale onboard`: First-time setup.

use super::CmdResult;
use ringtale_config::AppConfig;

pub async fn run() -> CmdResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Ringtale — First-Time Setup");
    println!("===========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    // The store file itself is created on first write.
    let config = AppConfig::load_from(&config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let store_path = config.memory.store_path();
    if let Some(parent) = store_path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    println!("  Memory store: {} ({})", store_path.display(), config.memory.backend);

    println!("\n📝 Next steps:");
    println!("   1. Edit {} and configure a provider", config_path.display());
    println!("   2. Import a character: ringtale card import lin.toml");
    println!("   3. Bind it to a window: ringtale card bind --window default lin");
    println!("   4. Run: ringtale chat --window default\n");

    Ok(())
}
