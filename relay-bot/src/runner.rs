//! Start-up sequence: logging, database, login, management room, then sync loop → engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::{init_tracing, Transport};
use relay_engine::RelayEngine;
use relay_matrix::{MatrixClient, SyncLoop, SyncSettings};
use storage::{CorrelationStore, RelayedMessage, SqlCorrelationStore};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::config::{MatrixAuth, RelayConfig};

/// Events buffered between the sync loop and the engine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    RelayEventId(String),
    OriginEventId(String),
}

/// Main entry: validate config, init logging, open the store, log in, join the management room,
/// then run the sync loop and the engine until Ctrl-C.
pub async fn run_bot(config: RelayConfig) -> Result<()> {
    config.validate()?;
    init_tracing(Path::new(&config.log_file))?;

    info!(
        homeserver = %config.homeserver_url,
        user_id = %config.user_id,
        database_url = %config.database_url,
        "Initializing relay bot"
    );

    let store = Arc::new(
        SqlCorrelationStore::open(&config.database_url)
            .await
            .context("Failed to open correlation store")?,
    );
    let client = connect(&config).await?;

    let management_room_id = client
        .join_room(&config.management_room)
        .await
        .with_context(|| format!("Failed to join management room {}", config.management_room))?;
    info!(management_room_id = %management_room_id, "Management room ready");

    let log_room_id = match config.log_room.as_deref() {
        Some(reference) => Some(
            resolve_room(&client, reference)
                .await
                .with_context(|| format!("Failed to resolve log room {}", reference))?,
        ),
        None => None,
    };

    let engine = RelayEngine::new(
        config.engine_config(client.user_id(), &management_room_id, log_room_id),
        Arc::new(client.clone()),
        store,
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let sync = tokio::spawn(SyncLoop::new(client, SyncSettings::default()).listen(tx));

    info!("Relay bot started successfully");
    tokio::select! {
        _ = engine.run(rx) => warn!("Event stream ended"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }
    sync.abort();
    Ok(())
}

/// Room ids pass through; aliases (`#name:server`) are resolved so events from the room match.
pub async fn resolve_room<T>(transport: &T, reference: &str) -> Result<String>
where
    T: Transport + ?Sized,
{
    let reference = reference.trim();
    if !reference.starts_with('#') {
        return Ok(reference.to_string());
    }
    let room_id = transport.resolve_room_alias(reference).await?;
    info!(alias = %reference, room_id = %room_id, "Resolved room alias");
    Ok(room_id)
}

/// Access tokens restore a session as the token's owner (whoami), which may differ from
/// `MATRIX_USER_ID`; passwords log in as the configured user.
#[instrument(skip(config), fields(user_id = %config.user_id))]
async fn connect(config: &RelayConfig) -> Result<MatrixClient> {
    match &config.auth {
        MatrixAuth::AccessToken(token) => MatrixClient::from_access_token(
            &config.homeserver_url,
            &config.user_id,
            token,
            config.device_id.as_deref(),
        )
        .await
        .context("Access token rejected"),
        MatrixAuth::Password(password) => MatrixClient::login(
            &config.homeserver_url,
            &config.user_id,
            password,
            config.device_id.as_deref(),
            &config.device_name,
        )
        .await
        .context("Password login failed"),
    }
}

/// Opens the database, applies pending migrations and returns the schema version.
pub async fn migrate(database_url: &str) -> Result<i64> {
    let store = SqlCorrelationStore::open(database_url)
        .await
        .context("Failed to open database")?;
    let version = storage::run_migrations(store.pool()).await?;
    Ok(version)
}

/// Administrative correlation lookup.
pub async fn lookup(database_url: &str, key: &LookupKey) -> Result<Option<RelayedMessage>> {
    let store = SqlCorrelationStore::open(database_url)
        .await
        .context("Failed to open database")?;
    let row = match key {
        LookupKey::RelayEventId(id) => store.lookup_by_relay_event_id(id).await?,
        LookupKey::OriginEventId(id) => store.lookup_by_origin_event_id(id).await?,
    };
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{OutboundMessage, SendResponse, TransportError};
    use std::sync::Mutex;

    /// Answers alias lookups from a fixed table and records them.
    #[derive(Default)]
    struct DirectoryTransport {
        resolved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for DirectoryTransport {
        async fn send_message(&self, _message: &OutboundMessage) -> Result<SendResponse, TransportError> {
            unreachable!("no sends during room resolution")
        }

        async fn send_reaction(
            &self,
            _room_id: &str,
            _event_id: &str,
            _key: &str,
        ) -> Result<SendResponse, TransportError> {
            unreachable!("no reactions during room resolution")
        }

        async fn join_room(&self, room_id_or_alias: &str) -> Result<String, TransportError> {
            Ok(room_id_or_alias.to_string())
        }

        async fn resolve_room_alias(&self, alias: &str) -> Result<String, TransportError> {
            self.resolved.lock().unwrap().push(alias.to_string());
            match alias {
                "#logs:x" => Ok("!logs:x".to_string()),
                _ => Err(TransportError::Protocol {
                    errcode: "M_NOT_FOUND".to_string(),
                    message: "Room alias not found".to_string(),
                }),
            }
        }

        async fn create_direct_room(&self, _user_id: &str) -> Result<String, TransportError> {
            unreachable!("no direct rooms during room resolution")
        }
    }

    /// **Test: A log room given as an alias is resolved to its room id.**
    ///
    /// **Setup:** Directory maps `#logs:x` to `!logs:x`.
    /// **Action:** Resolve `#logs:x`.
    /// **Expected:** `!logs:x`, the id inbound events carry, so the log room is ignored.
    #[tokio::test]
    async fn test_alias_resolved_to_room_id() {
        let transport = DirectoryTransport::default();
        assert_eq!(resolve_room(&transport, "#logs:x").await.unwrap(), "!logs:x");
        assert_eq!(*transport.resolved.lock().unwrap(), vec!["#logs:x".to_string()]);
    }

    #[tokio::test]
    async fn test_room_id_passes_through() {
        let transport = DirectoryTransport::default();
        assert_eq!(resolve_room(&transport, " !logs:x ").await.unwrap(), "!logs:x");
        assert!(transport.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_alias_fails() {
        let transport = DirectoryTransport::default();
        let err = resolve_room(&transport, "#missing:x").await.unwrap_err();
        assert!(err.to_string().contains("M_NOT_FOUND"), "{}", err);
    }
}
