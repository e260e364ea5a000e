//! CLI parser.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "relay-bot")]
#[command(about = "Matrix relay bot: relay rooms into a management room and route replies back", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Load environment variables from this file instead of `.env`.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (config from env).
    Run,
    /// Apply pending database migrations and exit.
    Migrate {
        /// Overrides DATABASE_URL.
        #[arg(long)]
        database_url: Option<String>,
    },
    /// Print the stored correlation for an event id.
    Lookup {
        #[arg(long, conflicts_with = "origin_event_id", required_unless_present = "origin_event_id")]
        relay_event_id: Option<String>,
        #[arg(long)]
        origin_event_id: Option<String>,
        /// Overrides DATABASE_URL.
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_env_file() {
        let cli = Cli::try_parse_from(["relay-bot", "run", "--env-file", "prod.env"]).unwrap();
        assert_eq!(cli.command, Commands::Run);
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn test_parse_lookup_requires_exactly_one_id() {
        let cli = Cli::try_parse_from(["relay-bot", "lookup", "--relay-event-id", "$m1"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Lookup {
                relay_event_id: Some("$m1".to_string()),
                origin_event_id: None,
                database_url: None
            }
        );

        assert!(Cli::try_parse_from(["relay-bot", "lookup"]).is_err());
        assert!(Cli::try_parse_from([
            "relay-bot",
            "lookup",
            "--relay-event-id",
            "$m1",
            "--origin-event-id",
            "$1"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from(["relay-bot", "migrate", "--database-url", "sqlite::memory:"])
            .unwrap();
        assert_eq!(
            cli.command,
            Commands::Migrate {
                database_url: Some("sqlite::memory:".to_string())
            }
        );
    }
}
