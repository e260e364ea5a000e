//! Correlation model: one row of the `messages` table.

use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::Row;

/// Link between an origin event and the relay event it produced.
///
/// `origin_event_id` and `relay_event_id` are each unique across all rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub origin_event_id: String,
    pub relay_event_id: String,
    pub origin_room_id: String,
    pub sender: String,
}

impl RelayedMessage {
    pub fn new(
        origin_event_id: impl Into<String>,
        relay_event_id: impl Into<String>,
        origin_room_id: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            origin_event_id: origin_event_id.into(),
            relay_event_id: relay_event_id.into(),
            origin_room_id: origin_room_id.into(),
            sender: sender.into(),
        }
    }

    pub(crate) fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            origin_event_id: row.try_get("origin_event_id")?,
            relay_event_id: row.try_get("relay_event_id")?,
            origin_room_id: row.try_get("room_id")?,
            sender: row.try_get("sender")?,
        })
    }
}
