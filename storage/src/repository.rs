use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::RelayedMessage;

/// Persistent origin ↔ relay correlation plus per-user direct rooms.
///
/// The only way the rest of the bot touches these tables.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Persists a new correlation. Fails with [`StorageError::DuplicateKey`] if either id is already stored.
    async fn record_relay(
        &self,
        origin_event_id: &str,
        relay_event_id: &str,
        origin_room_id: &str,
        sender: &str,
    ) -> Result<(), StorageError>;

    async fn lookup_by_relay_event_id(
        &self,
        relay_event_id: &str,
    ) -> Result<Option<RelayedMessage>, StorageError>;

    async fn lookup_by_origin_event_id(
        &self,
        origin_event_id: &str,
    ) -> Result<Option<RelayedMessage>, StorageError>;

    /// Stores (or replaces) the direct room used for `user_id`.
    async fn store_direct_room(&self, user_id: &str, room_id: &str) -> Result<(), StorageError>;

    async fn get_direct_room(&self, user_id: &str) -> Result<Option<String>, StorageError>;
}
