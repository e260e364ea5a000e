//! Invites and joins: accept every invite, announce joins in the management room, and greet group
//! rooms once per session.

use std::sync::Arc;

use relay_core::{OutboundMessage, RoomInfo};
use tracing::{error, info, warn};

use crate::dedup::EventDeduplicator;
use crate::dispatcher::RateLimitedDispatcher;

pub struct MembershipNotifier {
    management_room_id: String,
    welcome_message: Option<String>,
    /// Rooms already greeted this session.
    welcomed: EventDeduplicator,
    dispatcher: Arc<RateLimitedDispatcher>,
}

impl MembershipNotifier {
    pub fn new(
        management_room_id: impl Into<String>,
        welcome_message: Option<String>,
        capacity: usize,
        dispatcher: Arc<RateLimitedDispatcher>,
    ) -> Self {
        Self {
            management_room_id: management_room_id.into(),
            welcome_message: welcome_message.filter(|m| !m.trim().is_empty()),
            welcomed: EventDeduplicator::new(capacity),
            dispatcher,
        }
    }

    pub async fn on_invite(&self, room_id: &str) {
        match self.dispatcher.join_room(room_id).await {
            Ok(joined) => info!(room_id = %joined, "Joined room after invite"),
            Err(e) => error!(room_id, error = %e, "Failed to join room after invite"),
        }
    }

    pub async fn on_joined(&mut self, room: &RoomInfo) {
        if room.room_id == self.management_room_id {
            return;
        }

        if let Some(welcome) = &self.welcome_message {
            if room.is_group() && self.welcomed.should_process(&room.room_id) {
                let message = OutboundMessage::notice(&room.room_id, welcome.as_str());
                if let Err(e) = self.dispatcher.send(&message).await {
                    warn!(room_id = %room.room_id, error = %e, "Failed to send welcome message");
                }
            }
        }

        let text = if room.display_name() == room.room_id {
            format!("I have joined room {}.", room.room_id)
        } else {
            format!("I have joined room {} ({}).", room.display_name(), room.room_id)
        };
        if let Err(e) = self
            .dispatcher
            .send(&OutboundMessage::notice(&self.management_room_id, text))
            .await
        {
            error!(room_id = %room.room_id, error = %e, "Failed to announce join");
        }
    }
}
