//! First handler in the chain: vetoes the bot's own events and everything in the log room.

use async_trait::async_trait;
use relay_core::{Handler, InboundEvent, Result, RoomInfo};
use tracing::debug;

pub struct IgnoreFilter {
    bot_user_id: String,
    log_room_id: Option<String>,
}

impl IgnoreFilter {
    pub fn new(bot_user_id: impl Into<String>, log_room_id: Option<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            log_room_id,
        }
    }
}

#[async_trait]
impl Handler for IgnoreFilter {
    async fn before(&self, event: &InboundEvent, room: &RoomInfo) -> Result<bool> {
        if event.sender == self.bot_user_id {
            debug!(event_id = %event.id, "Ignoring own event");
            return Ok(false);
        }
        if self.log_room_id.as_deref() == Some(room.room_id.as_str()) {
            debug!(event_id = %event.id, "Ignoring event in log room");
            return Ok(false);
        }
        Ok(true)
    }
}
