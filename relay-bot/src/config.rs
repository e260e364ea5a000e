use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_engine::{Confirmation, EngineConfig, RetryPolicy};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://relay-bot.db";
pub const DEFAULT_LOG_FILE: &str = "logs/relay-bot.log";

/// How the bot authenticates to the homeserver.
#[derive(Clone, PartialEq, Eq)]
pub enum MatrixAuth {
    AccessToken(String),
    Password(String),
}

impl std::fmt::Debug for MatrixAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatrixAuth::AccessToken(_) => f.write_str("AccessToken(..)"),
            MatrixAuth::Password(_) => f.write_str("Password(..)"),
        }
    }
}

/// Relay bot configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub homeserver_url: String,
    pub user_id: String,
    pub auth: MatrixAuth,
    pub device_id: Option<String>,
    pub device_name: String,
    pub database_url: String,
    pub log_file: String,
    /// Management room id or alias.
    pub management_room: String,
    pub log_room: Option<String>,
    pub command_prefix: String,
    pub reply_marker: String,
    pub anonymise: bool,
    pub mention_only_rooms: Vec<String>,
    pub mention_only_always_for_named: bool,
    pub welcome_message: Option<String>,
    pub confirm_reaction: bool,
    pub confirm_reaction_success: String,
    pub confirm_reaction_fail: String,
    pub notify_unresolved: bool,
    pub rate_limit_backoff_secs: u64,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_max_delay_secs: u64,
    pub dedup_cache_size: usize,
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        let auth = match (optional("MATRIX_ACCESS_TOKEN"), optional("MATRIX_PASSWORD")) {
            (Some(token), _) => MatrixAuth::AccessToken(token),
            (None, Some(password)) => MatrixAuth::Password(password),
            (None, None) => bail!("Either MATRIX_ACCESS_TOKEN or MATRIX_PASSWORD must be set"),
        };

        Ok(Self {
            homeserver_url: required("MATRIX_HOMESERVER_URL")?,
            user_id: required("MATRIX_USER_ID")?,
            auth,
            device_id: optional("MATRIX_DEVICE_ID"),
            device_name: optional("MATRIX_DEVICE_NAME").unwrap_or_else(|| "relay-bot".to_string()),
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_file: optional("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            management_room: required("MANAGEMENT_ROOM")?,
            log_room: optional("LOG_ROOM"),
            command_prefix: optional("COMMAND_PREFIX").unwrap_or_else(|| "!c".to_string()),
            reply_marker: optional("REPLY_MARKER").unwrap_or_else(|| "!reply".to_string()),
            anonymise: flag("ANONYMISE_SENDERS", false)?,
            mention_only_rooms: optional("MENTION_ONLY_ROOMS")
                .map(|rooms| {
                    rooms
                        .split(',')
                        .map(str::trim)
                        .filter(|room| !room.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            mention_only_always_for_named: flag("MENTION_ONLY_ALWAYS_FOR_NAMED", false)?,
            welcome_message: optional("WELCOME_MESSAGE"),
            confirm_reaction: flag("CONFIRM_REACTION", false)?,
            confirm_reaction_success: optional("CONFIRM_REACTION_SUCCESS")
                .unwrap_or_else(|| "✅".to_string()),
            confirm_reaction_fail: optional("CONFIRM_REACTION_FAIL")
                .unwrap_or_else(|| "❌".to_string()),
            notify_unresolved: flag("NOTIFY_UNRESOLVED_REPLIES", true)?,
            rate_limit_backoff_secs: parsed("RATE_LIMIT_BACKOFF_SECS", 3)?,
            rate_limit_max_attempts: parsed("RATE_LIMIT_MAX_ATTEMPTS", 10)?,
            rate_limit_max_delay_secs: parsed("RATE_LIMIT_MAX_DELAY_SECS", 60)?,
            dedup_cache_size: parsed("DEDUP_CACHE_SIZE", 1000)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.homeserver_url).is_err() {
            bail!(
                "MATRIX_HOMESERVER_URL is not a valid URL: {}",
                self.homeserver_url
            );
        }
        if !is_user_id(&self.user_id) {
            bail!("MATRIX_USER_ID must look like @user:server, got: {}", self.user_id);
        }
        if !is_room_reference(&self.management_room) {
            bail!(
                "MANAGEMENT_ROOM must be a room id (!...) or alias (#...), got: {}",
                self.management_room
            );
        }
        if let Some(log_room) = self.log_room.as_deref().filter(|r| !is_room_reference(r)) {
            bail!("LOG_ROOM must be a room id (!...) or alias (#...), got: {}", log_room);
        }
        if self.reply_marker.trim().is_empty() || self.command_prefix.trim().is_empty() {
            bail!("REPLY_MARKER and COMMAND_PREFIX must not be empty");
        }
        if self.rate_limit_max_attempts == 0 {
            bail!("RATE_LIMIT_MAX_ATTEMPTS must be at least 1");
        }
        if self.dedup_cache_size == 0 {
            bail!("DEDUP_CACHE_SIZE must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.rate_limit_backoff_secs),
            self.rate_limit_max_attempts,
        )
        .with_max_delay(Duration::from_secs(self.rate_limit_max_delay_secs))
    }

    pub fn confirmation(&self) -> Confirmation {
        if self.confirm_reaction {
            Confirmation::Reaction {
                success: self.confirm_reaction_success.clone(),
                failure: self.confirm_reaction_fail.clone(),
            }
        } else {
            Confirmation::Notice
        }
    }

    /// Engine settings once the bot's user id and the resolved room ids are known.
    pub fn engine_config(
        &self,
        bot_user_id: &str,
        management_room_id: &str,
        log_room_id: Option<String>,
    ) -> EngineConfig {
        EngineConfig {
            log_room_id,
            command_prefix: self.command_prefix.clone(),
            reply_marker: self.reply_marker.clone(),
            anonymise: self.anonymise,
            mention_only_rooms: self.mention_only_rooms.clone(),
            mention_only_always_for_named: self.mention_only_always_for_named,
            welcome_message: self.welcome_message.clone(),
            confirmation: self.confirmation(),
            notify_unresolved: self.notify_unresolved,
            retry: self.retry_policy(),
            dedup_capacity: self.dedup_cache_size,
            ..EngineConfig::new(bot_user_id, management_room_id)
        }
    }
}

fn is_room_reference(value: &str) -> bool {
    value.starts_with('!') || value.starts_with('#')
}

fn is_user_id(value: &str) -> bool {
    value
        .strip_prefix('@')
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(local, server)| !local.is_empty() && !server.is_empty())
}

/// Trimmed, non-empty value of `name`.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).with_context(|| format!("{} not set", name))
}

fn flag(name: &str, default: bool) -> Result<bool> {
    match optional(name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{} must be true or false, got: {}", name, value),
        },
    }
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid number: {}", name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MATRIX_HOMESERVER_URL",
        "MATRIX_USER_ID",
        "MATRIX_ACCESS_TOKEN",
        "MATRIX_PASSWORD",
        "MATRIX_DEVICE_ID",
        "MATRIX_DEVICE_NAME",
        "DATABASE_URL",
        "LOG_FILE",
        "MANAGEMENT_ROOM",
        "LOG_ROOM",
        "COMMAND_PREFIX",
        "REPLY_MARKER",
        "ANONYMISE_SENDERS",
        "MENTION_ONLY_ROOMS",
        "MENTION_ONLY_ALWAYS_FOR_NAMED",
        "WELCOME_MESSAGE",
        "CONFIRM_REACTION",
        "CONFIRM_REACTION_SUCCESS",
        "CONFIRM_REACTION_FAIL",
        "NOTIFY_UNRESOLVED_REPLIES",
        "RATE_LIMIT_BACKOFF_SECS",
        "RATE_LIMIT_MAX_ATTEMPTS",
        "RATE_LIMIT_MAX_DELAY_SECS",
        "DEDUP_CACHE_SIZE",
    ];

    fn set_required() {
        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("MATRIX_HOMESERVER_URL", "https://matrix.example.org");
        env::set_var("MATRIX_USER_ID", "@relay:example.org");
        env::set_var("MATRIX_ACCESS_TOKEN", "token");
        env::set_var("MANAGEMENT_ROOM", "!mgmt:example.org");
    }

    #[test]
    #[serial]
    fn test_load_config_with_defaults() {
        set_required();

        let config = RelayConfig::load().unwrap();
        config.validate().unwrap();

        assert_eq!(config.auth, MatrixAuth::AccessToken("token".to_string()));
        assert_eq!(config.device_name, "relay-bot");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.log_file, DEFAULT_LOG_FILE);
        assert_eq!(config.command_prefix, "!c");
        assert_eq!(config.reply_marker, "!reply");
        assert!(!config.anonymise);
        assert!(config.mention_only_rooms.is_empty());
        assert!(!config.mention_only_always_for_named);
        assert!(config.welcome_message.is_none());
        assert_eq!(config.confirmation(), Confirmation::Notice);
        assert!(config.notify_unresolved);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.dedup_cache_size, 1000);
    }

    #[test]
    #[serial]
    fn test_load_config_with_custom_values() {
        set_required();
        env::remove_var("MATRIX_ACCESS_TOKEN");
        env::set_var("MATRIX_PASSWORD", "secret");
        env::set_var("MENTION_ONLY_ROOMS", " !a:example.org , #b:example.org,, ");
        env::set_var("ANONYMISE_SENDERS", "yes");
        env::set_var("CONFIRM_REACTION", "true");
        env::set_var("CONFIRM_REACTION_SUCCESS", "👍");
        env::set_var("NOTIFY_UNRESOLVED_REPLIES", "false");
        env::set_var("RATE_LIMIT_BACKOFF_SECS", "5");
        env::set_var("RATE_LIMIT_MAX_ATTEMPTS", "4");
        env::set_var("RATE_LIMIT_MAX_DELAY_SECS", "20");
        env::set_var("DEDUP_CACHE_SIZE", "50");
        env::set_var("WELCOME_MESSAGE", "Hello!");

        let config = RelayConfig::load().unwrap();

        assert_eq!(config.auth, MatrixAuth::Password("secret".to_string()));
        assert_eq!(
            config.mention_only_rooms,
            vec!["!a:example.org".to_string(), "#b:example.org".to_string()]
        );
        assert!(config.anonymise);
        assert_eq!(
            config.confirmation(),
            Confirmation::Reaction {
                success: "👍".to_string(),
                failure: "❌".to_string()
            }
        );

        let engine = config.engine_config(
            "@relay:example.org",
            "!mgmt:example.org",
            Some("!logs:example.org".to_string()),
        );
        assert!(!engine.notify_unresolved);
        assert!(engine.anonymise);
        assert_eq!(
            engine.retry,
            RetryPolicy::new(Duration::from_secs(5), 4).with_max_delay(Duration::from_secs(20))
        );
        assert_eq!(engine.log_room_id.as_deref(), Some("!logs:example.org"));
        assert_eq!(engine.dedup_capacity, 50);
        assert_eq!(engine.welcome_message.as_deref(), Some("Hello!"));
        assert_eq!(engine.management_room_id, "!mgmt:example.org");
    }

    #[test]
    #[serial]
    fn test_missing_credentials_rejected() {
        set_required();
        env::remove_var("MATRIX_ACCESS_TOKEN");

        let err = RelayConfig::load().unwrap_err();
        assert!(err.to_string().contains("MATRIX_ACCESS_TOKEN"));
    }

    #[test]
    #[serial]
    fn test_missing_management_room_rejected() {
        set_required();
        env::remove_var("MANAGEMENT_ROOM");

        let err = RelayConfig::load().unwrap_err();
        assert_eq!(err.to_string(), "MANAGEMENT_ROOM not set");
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        set_required();
        env::set_var("ANONYMISE_SENDERS", "maybe");
        assert!(RelayConfig::load().is_err());

        env::remove_var("ANONYMISE_SENDERS");
        env::set_var("RATE_LIMIT_MAX_ATTEMPTS", "many");
        assert!(RelayConfig::load().is_err());
    }

    #[test]
    #[serial]
    fn test_validate_rejects_bad_ids() {
        set_required();
        let config = RelayConfig::load().unwrap();

        let mut bad_url = config.clone();
        bad_url.homeserver_url = "not a url".to_string();
        assert!(bad_url.validate().is_err());

        let mut bad_user = config.clone();
        bad_user.user_id = "relay".to_string();
        assert!(bad_user.validate().is_err());

        let mut bad_room = config.clone();
        bad_room.management_room = "management".to_string();
        assert!(bad_room.validate().is_err());

        let mut named_log_room = config.clone();
        named_log_room.log_room = Some("#logs:example.org".to_string());
        assert!(named_log_room.validate().is_ok());

        let mut bad_log_room = config.clone();
        bad_log_room.log_room = Some("logs".to_string());
        let err = bad_log_room.validate().unwrap_err();
        assert!(err.to_string().starts_with("LOG_ROOM"));

        let mut zero_attempts = config;
        zero_attempts.rate_limit_max_attempts = 0;
        assert!(zero_attempts.validate().is_err());
    }
}
