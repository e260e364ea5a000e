//! Operator replies and edits in the management room.
//!
//! A management-room event is classified as exactly one of:
//!
//! - **NewReply**: a reply (`ReplyTo`) whose body, after the quoted reply fallback, starts with
//!   the reply marker. The text after the marker goes back to the origin room as a reply to the
//!   original event.
//! - **EditOfReply**: an edit (`Replaces`) whose new-content body starts with the marker. The
//!   text is sent as an edit of the message the earlier reply produced.
//! - **Unrelated**: anything else. Ordinary chatter; no side effect.
//!
//! Successful forwards are recorded as correlations (management event → forwarded event) so the
//! forwarded reply can itself be edited later.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Handler, HandlerResponse, InboundEvent, OutboundMessage, Relation, Result, RoomInfo,
};
use storage::{CorrelationStore, RelayedMessage};
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::{DispatchError, RateLimitedDispatcher};

pub const DEFAULT_REPLY_MARKER: &str = "!reply";

const UNRESOLVED_NOTICE: &str =
    "Could not find the original message for this reply; it was not delivered.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    NewReply { target_id: String, text: String },
    EditOfReply { target_id: String, text: String },
    Unrelated,
}

/// How delivery is confirmed to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Confirmation {
    #[default]
    Notice,
    /// React to the operator's event with `success` or `failure`.
    Reaction { success: String, failure: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Delivered {
        room_id: String,
        event_id: String,
    },
    Failed(String),
    /// The relation target has no usable correlation.
    Unresolved,
    Unrelated,
}

/// Removes a leading quoted reply fallback (`> ` lines and the blank line after them).
pub fn strip_reply_fallback(body: &str) -> &str {
    if !body.starts_with('>') {
        return body;
    }
    let mut rest = body;
    while rest.starts_with('>') {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest.strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest)
}

/// Text after `marker` when `body` starts with it; `None` when the marker is absent or nothing follows it.
pub fn extract_marked_text<'a>(body: &'a str, marker: &str) -> Option<&'a str> {
    let rest = strip_reply_fallback(body).trim_start().strip_prefix(marker)?;
    if rest.chars().next().is_some_and(|c| !c.is_whitespace()) {
        // "!replying" is not the marker
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

/// Classifies a management-room event. Pure: no lookups happen here.
pub fn classify(event: &InboundEvent, marker: &str) -> Classification {
    match &event.relation {
        Relation::ReplyTo { target_id } => match extract_marked_text(&event.body, marker) {
            Some(text) => Classification::NewReply {
                target_id: target_id.clone(),
                text: text.to_string(),
            },
            None => Classification::Unrelated,
        },
        Relation::Replaces {
            target_id,
            new_body,
        } => match extract_marked_text(new_body, marker) {
            Some(text) => Classification::EditOfReply {
                target_id: target_id.clone(),
                text: text.to_string(),
            },
            None => Classification::Unrelated,
        },
        Relation::None => Classification::Unrelated,
    }
}

pub struct ReplyResolver {
    management_room_id: String,
    reply_marker: String,
    confirmation: Confirmation,
    anonymise: bool,
    notify_unresolved: bool,
    dispatcher: Arc<RateLimitedDispatcher>,
    store: Arc<dyn CorrelationStore>,
}

impl ReplyResolver {
    pub fn new(
        management_room_id: impl Into<String>,
        dispatcher: Arc<RateLimitedDispatcher>,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            management_room_id: management_room_id.into(),
            reply_marker: DEFAULT_REPLY_MARKER.to_string(),
            confirmation: Confirmation::Notice,
            anonymise: false,
            notify_unresolved: true,
            dispatcher,
            store,
        }
    }

    pub fn with_reply_marker(mut self, marker: impl Into<String>) -> Self {
        self.reply_marker = marker.into();
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Anonymised confirmations do not name the origin room.
    pub fn with_anonymise(mut self, anonymise: bool) -> Self {
        self.anonymise = anonymise;
        self
    }

    pub fn with_notify_unresolved(mut self, notify: bool) -> Self {
        self.notify_unresolved = notify;
        self
    }

    /// Classifies `event` and, for replies and edits, routes the text back to the origin room.
    #[instrument(skip(self, event), fields(event_id = %event.id, sender = %event.sender))]
    pub async fn resolve(&self, event: &InboundEvent) -> ResolveOutcome {
        match classify(event, &self.reply_marker) {
            Classification::Unrelated => {
                debug!("Management room message without reply marker");
                ResolveOutcome::Unrelated
            }
            Classification::NewReply { target_id, text } => {
                let Some(row) = self.lookup_reply_target(&target_id).await else {
                    return self.unresolved(event, &target_id).await;
                };
                let message =
                    OutboundMessage::text(&row.origin_room_id, text).reply_to(&row.origin_event_id);
                self.forward(event, &row, &message, false).await
            }
            Classification::EditOfReply { target_id, text } => {
                let Some(row) = self.lookup_edit_target(&target_id, &event.sender).await else {
                    return self.unresolved(event, &target_id).await;
                };
                let message =
                    OutboundMessage::text(&row.origin_room_id, text).replacing(&row.relay_event_id);
                self.forward(event, &row, &message, true).await
            }
        }
    }

    async fn lookup_reply_target(&self, target_id: &str) -> Option<RelayedMessage> {
        match self.store.lookup_by_relay_event_id(target_id).await {
            Ok(row) => row,
            Err(e) => {
                error!(target_id, error = %e, "Correlation lookup failed");
                None
            }
        }
    }

    /// The edit target is either the operator's own reply event (origin side) or the forwarded
    /// copy (relay side). Only rows written for this operator's replies qualify.
    async fn lookup_edit_target(&self, target_id: &str, operator: &str) -> Option<RelayedMessage> {
        let by_origin = self.store.lookup_by_origin_event_id(target_id).await;
        let row = match by_origin {
            Ok(Some(row)) => Some(row),
            Ok(None) => match self.store.lookup_by_relay_event_id(target_id).await {
                Ok(row) => row,
                Err(e) => {
                    error!(target_id, error = %e, "Correlation lookup failed");
                    None
                }
            },
            Err(e) => {
                error!(target_id, error = %e, "Correlation lookup failed");
                None
            }
        };

        row.filter(|row| {
            let own = row.sender == operator;
            if !own {
                debug!(target_id, "Edit target is not one of this operator's replies");
            }
            own
        })
    }

    async fn forward(
        &self,
        event: &InboundEvent,
        row: &RelayedMessage,
        message: &OutboundMessage,
        is_edit: bool,
    ) -> ResolveOutcome {
        match self.dispatcher.send(message).await {
            Ok(response) => {
                info!(
                    origin_room_id = %row.origin_room_id,
                    forwarded_event_id = %response.event_id,
                    is_edit,
                    "Delivered operator reply"
                );
                if let Err(e) = self
                    .store
                    .record_relay(
                        &event.id,
                        &response.event_id,
                        &row.origin_room_id,
                        &event.sender,
                    )
                    .await
                {
                    warn!(error = %e, "Delivered reply but could not record correlation");
                }
                self.confirm_success(event, &row.origin_room_id, is_edit).await;
                ResolveOutcome::Delivered {
                    room_id: row.origin_room_id.clone(),
                    event_id: response.event_id,
                }
            }
            Err(e) => {
                error!(origin_room_id = %row.origin_room_id, error = %e, "Failed to deliver operator reply");
                self.confirm_failure(event, &e).await;
                ResolveOutcome::Failed(e.to_string())
            }
        }
    }

    async fn unresolved(&self, event: &InboundEvent, target_id: &str) -> ResolveOutcome {
        debug!(target_id, "No correlation for reply target");
        if self.notify_unresolved {
            self.notify(event, UNRESOLVED_NOTICE).await;
        }
        ResolveOutcome::Unresolved
    }

    async fn confirm_success(&self, event: &InboundEvent, origin_room_id: &str, is_edit: bool) {
        match &self.confirmation {
            Confirmation::Reaction { success, .. } => self.react(event, success).await,
            Confirmation::Notice => {
                let what = if is_edit { "Edit" } else { "Message" };
                let text = if self.anonymise {
                    format!("{} delivered back to the sender.", what)
                } else {
                    format!("{} delivered back to the sender in room {}.", what, origin_room_id)
                };
                self.notify(event, &text).await;
            }
        }
    }

    async fn confirm_failure(&self, event: &InboundEvent, err: &DispatchError) {
        if let Confirmation::Reaction { failure, .. } = &self.confirmation {
            self.react(event, failure).await;
        }
        let text = format!("Failed to deliver message back to the sender: {}", err);
        self.notify(event, &text).await;
    }

    async fn notify(&self, event: &InboundEvent, text: &str) {
        let notice = OutboundMessage::notice(&self.management_room_id, text).reply_to(&event.id);
        if let Err(e) = self.dispatcher.send(&notice).await {
            error!(error = %e, "Failed to send confirmation notice");
        }
    }

    async fn react(&self, event: &InboundEvent, key: &str) {
        if let Err(e) = self
            .dispatcher
            .send_reaction(&self.management_room_id, &event.id, key)
            .await
        {
            error!(error = %e, "Failed to send confirmation reaction");
        }
    }
}

#[async_trait]
impl Handler for ReplyResolver {
    async fn handle(&self, event: &InboundEvent, room: &RoomInfo) -> Result<HandlerResponse> {
        if room.room_id != self.management_room_id {
            return Ok(HandlerResponse::Ignore);
        }
        match self.resolve(event).await {
            ResolveOutcome::Unrelated => Ok(HandlerResponse::Continue),
            _ => Ok(HandlerResponse::Stop),
        }
    }
}
