//! relay-bot CLI: run the bot, apply migrations, or look up a stored correlation.

use anyhow::{Context, Result};
use clap::Parser;
use relay_bot::{lookup, migrate, run_bot, Cli, Commands, LookupKey, RelayConfig, DEFAULT_DATABASE_URL};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    match cli.command {
        Commands::Run => {
            let config = RelayConfig::load()?;
            run_bot(config).await
        }
        Commands::Migrate { database_url } => {
            let url = database_url_or_env(database_url);
            let version = migrate(&url).await?;
            println!("Database {} is at schema version {}", url, version);
            Ok(())
        }
        Commands::Lookup {
            relay_event_id,
            origin_event_id,
            database_url,
        } => {
            let url = database_url_or_env(database_url);
            let key = match (relay_event_id, origin_event_id) {
                (Some(id), _) => LookupKey::RelayEventId(id),
                (None, Some(id)) => LookupKey::OriginEventId(id),
                (None, None) => anyhow::bail!("--relay-event-id or --origin-event-id is required"),
            };
            match lookup(&url, &key).await? {
                Some(row) => println!(
                    "origin_event_id={} relay_event_id={} room_id={} sender={}",
                    row.origin_event_id, row.relay_event_id, row.origin_room_id, row.sender
                ),
                None => println!("No correlation found"),
            }
            Ok(())
        }
    }
}

fn database_url_or_env(database_url: Option<String>) -> String {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}
