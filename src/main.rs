//! # PiBot: Personal Telegram Automation Agent
//!
//! Answers chat commands with host telemetry and runs durable recurring
//! reminders that survive restarts.
//!
//! Usage:
//!   pibot                          # Run the bot
//!   pibot --config ./pibot.toml    # Custom config file
//!   pibot migrate                  # Apply database migrations and exit
//!   pibot check-config             # Validate configuration and exit

mod bot;
mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pibot_core::PiBotConfig;
use pibot_scheduler::{MigrationRunner, ReminderStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pibot", version, about = "🤖 PiBot: telemetry and reminders over Telegram")]
struct Cli {
    /// Config file (default: ~/.pibot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations and exit
    Migrate,
    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pibot=debug,pibot_scheduler=debug,pibot_channels=debug,pibot_monitor=debug"
    } else {
        "pibot=info,pibot_scheduler=info,pibot_channels=info,pibot_monitor=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(PiBotConfig::default_path);
    let config = PiBotConfig::load_with_env(&config_path)?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());

    match cli.command {
        Some(Command::Migrate) => {
            let store = ReminderStore::open(&db_path)?;
            let latest = MigrationRunner::embedded()?.latest_version();
            println!(
                "✅ Database {} at schema version {} (latest {})",
                db_path.display(),
                store.schema_version()?.unwrap_or(0),
                latest.unwrap_or(0)
            );
        }
        Some(Command::CheckConfig) => {
            config.validate()?;
            println!("✅ Config OK ({})", config_path.display());
            println!("   Allowed users: {:?}", config.telegram.allowed_user_ids);
            println!("   Database:      {}", db_path.display());
        }
        None => {
            config.validate()?;
            tracing::info!("📂 Database: {}", db_path.display());
            let store = Arc::new(ReminderStore::open(&db_path)?);
            bot::run(config, store).await?;
            tracing::info!("👋 PiBot stopped");
        }
    }

    Ok(())
}
