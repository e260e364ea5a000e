//! Origin-room relay: decides whether an inbound event is forwarded to the management room and
//! records the resulting correlation.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{Handler, HandlerResponse, InboundEvent, OutboundMessage, Result, RoomInfo};
use storage::CorrelationStore;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::RateLimitedDispatcher;
use crate::mention::{is_mentioned, MentionPolicy};

/// Replacement written over the sender id when anonymising.
const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    OwnMessage,
    LogRoom,
    ManagementRoom,
    NotMentioned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The copy was sent; `relay_event_id` is its id in the management room.
    Relayed { relay_event_id: String },
    Skipped(SkipReason),
    /// The dispatcher returned an error; nothing was recorded.
    Failed(String),
}

pub struct RelayRouter {
    bot_user_id: String,
    management_room_id: String,
    log_room_id: Option<String>,
    anonymise: bool,
    policy: MentionPolicy,
    dispatcher: Arc<RateLimitedDispatcher>,
    store: Arc<dyn CorrelationStore>,
}

impl RelayRouter {
    pub fn new(
        bot_user_id: impl Into<String>,
        management_room_id: impl Into<String>,
        dispatcher: Arc<RateLimitedDispatcher>,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            management_room_id: management_room_id.into(),
            log_room_id: None,
            anonymise: false,
            policy: MentionPolicy::default(),
            dispatcher,
            store,
        }
    }

    pub fn with_log_room(mut self, log_room_id: Option<String>) -> Self {
        self.log_room_id = log_room_id;
        self
    }

    pub fn with_anonymise(mut self, anonymise: bool) -> Self {
        self.anonymise = anonymise;
        self
    }

    pub fn with_mention_policy(mut self, policy: MentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Text of the management-room copy for `event` in `room`.
    pub fn compose(&self, event: &InboundEvent, room: &RoomInfo) -> String {
        let body = event.text();
        if self.anonymise {
            return format!("{}: {}", ANONYMOUS, redact_sender(body, &event.sender));
        }

        let display = room.display_name();
        if display == room.room_id {
            format!("{} in {}: {}", event.sender, room.room_id, body)
        } else {
            format!("{} in {} ({}): {}", event.sender, display, room.room_id, body)
        }
    }

    /// Forwards `event` to the management room unless it is filtered out.
    #[instrument(skip(self, event, room), fields(event_id = %event.id, room_id = %room.room_id))]
    pub async fn relay(&self, event: &InboundEvent, room: &RoomInfo) -> RelayOutcome {
        if event.sender == self.bot_user_id {
            return RelayOutcome::Skipped(SkipReason::OwnMessage);
        }
        if self.log_room_id.as_deref() == Some(room.room_id.as_str()) {
            return RelayOutcome::Skipped(SkipReason::LogRoom);
        }
        if room.room_id == self.management_room_id {
            return RelayOutcome::Skipped(SkipReason::ManagementRoom);
        }

        if self.policy.requires_mention(room) && !is_mentioned(event.text(), &self.bot_user_id) {
            debug!("Mention-only room and the bot was not mentioned, not relaying");
            return RelayOutcome::Skipped(SkipReason::NotMentioned);
        }

        let message = OutboundMessage::notice(&self.management_room_id, self.compose(event, room));
        let response = match self.dispatcher.send(&message).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Failed to relay message to management room");
                return RelayOutcome::Failed(e.to_string());
            }
        };

        if let Err(e) = self
            .store
            .record_relay(&event.id, &response.event_id, &room.room_id, &event.sender)
            .await
        {
            warn!(
                relay_event_id = %response.event_id,
                error = %e,
                "Relayed message but could not record correlation"
            );
        } else {
            info!(relay_event_id = %response.event_id, "Relayed message to management room");
        }

        RelayOutcome::Relayed {
            relay_event_id: response.event_id,
        }
    }
}

#[async_trait]
impl Handler for RelayRouter {
    async fn handle(&self, event: &InboundEvent, room: &RoomInfo) -> Result<HandlerResponse> {
        if room.room_id == self.management_room_id {
            return Ok(HandlerResponse::Ignore);
        }
        match self.relay(event, room).await {
            RelayOutcome::Skipped(reason) => {
                debug!(event_id = %event.id, reason = ?reason, "Not relayed");
                Ok(HandlerResponse::Ignore)
            }
            RelayOutcome::Relayed { .. } | RelayOutcome::Failed(_) => Ok(HandlerResponse::Stop),
        }
    }
}

/// Replaces every occurrence of `sender` in `body`, including ones formed by a previous pass.
fn redact_sender(body: &str, sender: &str) -> String {
    if sender.is_empty() {
        return body.to_string();
    }
    // Each pass removes a character the replacement cannot reintroduce, so the loop ends.
    if sender.chars().all(|c| ANONYMOUS.contains(c)) {
        return body.replace(sender, ANONYMOUS);
    }
    let mut redacted = body.to_string();
    while redacted.contains(sender) {
        redacted = redacted.replace(sender, ANONYMOUS);
    }
    redacted
}
