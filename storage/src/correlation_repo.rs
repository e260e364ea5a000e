//! Correlation repository: persistence and lookups for relayed messages and direct rooms.
//!
//! Uses DatabasePool and runs migrations on open; callers go through [`CorrelationStore`].

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::error::{is_unique_violation, StorageError};
use crate::migrations::run_migrations;
use crate::models::RelayedMessage;
use crate::pool::DatabasePool;
use crate::repository::CorrelationStore;

#[derive(Clone)]
pub struct SqlCorrelationStore {
    db: DatabasePool,
}

impl SqlCorrelationStore {
    /// Connects to `database_url` and applies pending migrations.
    pub async fn open(database_url: &str) -> Result<Self, StorageError> {
        let db = DatabasePool::connect(database_url).await?;
        let version = run_migrations(&db).await?;
        info!(backend = ?db.backend(), version, "Database initialization complete");
        Ok(Self { db })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.db
    }

    async fn lookup(
        &self,
        column: &'static str,
        event_id: &str,
    ) -> Result<Option<RelayedMessage>, StorageError> {
        let sql = format!(
            "SELECT origin_event_id, relay_event_id, room_id, sender FROM messages WHERE {} = ?",
            column
        );
        let sql = self.db.sql(&sql);
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref()
            .map(RelayedMessage::from_row)
            .transpose()
            .map_err(StorageError::from)
    }
}

#[async_trait]
impl CorrelationStore for SqlCorrelationStore {
    #[instrument(skip(self))]
    async fn record_relay(
        &self,
        origin_event_id: &str,
        relay_event_id: &str,
        origin_room_id: &str,
        sender: &str,
    ) -> Result<(), StorageError> {
        let sql = self.db.sql(
            "INSERT INTO messages (origin_event_id, relay_event_id, room_id, sender) VALUES (?, ?, ?, ?)",
        );
        sqlx::query(&sql)
            .bind(origin_event_id)
            .bind(relay_event_id)
            .bind(origin_room_id)
            .bind(sender)
            .execute(self.db.pool())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateKey(format!(
                        "origin {} / relay {}",
                        origin_event_id, relay_event_id
                    ))
                } else {
                    StorageError::from(e)
                }
            })?;

        debug!(origin_event_id, relay_event_id, "Stored correlation");
        Ok(())
    }

    async fn lookup_by_relay_event_id(
        &self,
        relay_event_id: &str,
    ) -> Result<Option<RelayedMessage>, StorageError> {
        self.lookup("relay_event_id", relay_event_id).await
    }

    async fn lookup_by_origin_event_id(
        &self,
        origin_event_id: &str,
    ) -> Result<Option<RelayedMessage>, StorageError> {
        self.lookup("origin_event_id", origin_event_id).await
    }

    #[instrument(skip(self))]
    async fn store_direct_room(&self, user_id: &str, room_id: &str) -> Result<(), StorageError> {
        let sql = self.db.sql(
            "INSERT INTO directs (user_id, room_id) VALUES (?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET room_id = excluded.room_id",
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(room_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn get_direct_room(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        let sql = self.db.sql("SELECT room_id FROM directs WHERE user_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("room_id")).transpose()?)
    }
}
