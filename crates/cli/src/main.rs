//! Ringtale CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Initialize config and the memory store
//! - `chat`: Interactive or single-message narrative turns
//! - `memory`: Inspect and edit a window's memory tiers
//! - `card`: Import, list and bind character cards
//! - `status`: Show configuration and routing

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ringtale",
    about = "Ringtale — window-scoped memory and narrative orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and the memory store
    Onboard,

    /// Play narrative turns in a window
    Chat {
        /// Window id the session is bound to
        #[arg(short, long, default_value = "default")]
        window: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Force a narrator channel (story, wechat, call, moment)
        #[arg(short, long)]
        channel: Option<String>,

        /// Skip the world-driver classification
        #[arg(long)]
        no_driver: bool,
    },

    /// Inspect and edit window memory
    Memory {
        #[command(subcommand)]
        action: commands::memory::MemoryAction,
    },

    /// Manage character cards
    Card {
        #[command(subcommand)]
        action: commands::card::CardAction,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            window,
            message,
            channel,
            no_driver,
        } => commands::chat::run(&window, message, channel.as_deref(), !no_driver).await?,
        Commands::Memory { action } => commands::memory::run(action).await?,
        Commands::Card { action } => commands::card::run(action).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
