//! Transport abstraction for the chat protocol client.
//!
//! [`Transport`] is protocol-agnostic; `relay-matrix` implements it over the Matrix
//! client-server API, tests substitute recording doubles.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{OutboundMessage, SendResponse};

/// Outbound primitives the relay engine needs from the chat protocol client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text message (optionally a reply to, or an edit of, another event). Returns the new event id.
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendResponse, TransportError>;

    /// Sends a reaction `key` annotating `event_id` in `room_id`.
    async fn send_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<SendResponse, TransportError>;

    /// Joins a room by id or alias and returns the joined room id.
    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, TransportError>;

    /// Resolves a room alias (`#name:server`) to a room id.
    async fn resolve_room_alias(&self, alias: &str) -> Result<String, TransportError>;

    /// Creates a direct room with `user_id` and returns its id.
    async fn create_direct_room(&self, user_id: &str) -> Result<String, TransportError>;
}
