//! Core types: inbound events, rooms, outbound messages, handler response, and the Handler trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fallback prefix the protocol puts in front of an edited message's body.
pub const EDIT_FALLBACK_PREFIX: &str = " * ";

/// Relation of an inbound event to an earlier event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Relation {
    #[default]
    None,
    /// The event is a reply to `target_id`.
    ReplyTo { target_id: String },
    /// The event is an edit of `target_id`; `new_body` is the edit's new-content body.
    Replaces { target_id: String, new_body: String },
}

/// A message event delivered by the transport. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub room_id: String,
    pub sender: String,
    pub body: String,
    #[serde(default)]
    pub relation: Relation,
}

impl InboundEvent {
    pub fn new(
        id: impl Into<String>,
        room_id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            body: body.into(),
            relation: Relation::None,
        }
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = relation;
        self
    }

    /// Body with the edit fallback marker removed.
    pub fn text(&self) -> &str {
        strip_edit_fallback(&self.body)
    }
}

/// Removes the `" * "` edit fallback prefix if present.
pub fn strip_edit_fallback(body: &str) -> &str {
    body.strip_prefix(EDIT_FALLBACK_PREFIX).unwrap_or(body)
}

/// What the transport knows about a room at the time an event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub name: Option<String>,
    pub canonical_alias: Option<String>,
    /// Number of joined members, when known.
    pub member_count: Option<u64>,
}

impl RoomInfo {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.canonical_alias = Some(alias.into());
        self
    }

    pub fn with_member_count(mut self, count: u64) -> Self {
        self.member_count = Some(count);
        self
    }

    /// A room is named when it has an explicit name or a canonical alias (direct chats usually have neither).
    pub fn is_named(&self) -> bool {
        self.name.is_some() || self.canonical_alias.is_some()
    }

    /// A group room has more than two joined members.
    pub fn is_group(&self) -> bool {
        self.member_count.is_some_and(|count| count > 2)
    }

    /// Human-readable room label: name, then alias, then id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.canonical_alias.as_deref())
            .unwrap_or(&self.room_id)
    }

    /// Identifiers a room can be configured by (alias and id).
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.canonical_alias
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.room_id.as_str()))
    }
}

/// A text message to send. Built with [`OutboundMessage::text`] / [`OutboundMessage::notice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub room_id: String,
    pub body: String,
    /// Sent as a notice (does not ping room members).
    pub notice: bool,
    /// Render the body as markdown into a formatted body.
    pub markdown: bool,
    pub reply_to: Option<String>,
    pub replaces: Option<String>,
}

impl OutboundMessage {
    /// A plain (non-notice) text message with markdown rendering.
    pub fn text(room_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            body: body.into(),
            notice: false,
            markdown: true,
            reply_to: None,
            replaces: None,
        }
    }

    /// A notice with markdown rendering.
    pub fn notice(room_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            notice: true,
            ..Self::text(room_id, body)
        }
    }

    pub fn reply_to(mut self, event_id: impl Into<String>) -> Self {
        self.reply_to = Some(event_id.into());
        self
    }

    pub fn replacing(mut self, event_id: impl Into<String>) -> Self {
        self.replaces = Some(event_id.into());
        self
    }
}

/// Successful send: the id of the event the transport created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub event_id: String,
}

impl SendResponse {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }
}

/// Everything the transport's sync loop hands to the processing path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message { event: InboundEvent, room: RoomInfo },
    /// The bot was invited to a room.
    Invited { room_id: String },
    /// The bot's own membership in `room` became `join`.
    Joined { room: RoomInfo },
}

/// Handler result for the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResponse {
    /// Pass to next handler.
    Continue,
    /// Stop the chain; the event was handled.
    Stop,
    /// The event is not for this handler; try next.
    Ignore,
}

/// Single handler concept: optional before / handle / after. Chain runs all before → handle until Stop → all after (reverse).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs before the handle phase. Return false to stop the chain.
    async fn before(&self, _event: &InboundEvent, _room: &RoomInfo) -> crate::error::Result<bool> {
        Ok(true)
    }
    /// Processes the event. Return Stop to end the handle phase. Default: Continue.
    async fn handle(
        &self,
        _event: &InboundEvent,
        _room: &RoomInfo,
    ) -> crate::error::Result<HandlerResponse> {
        Ok(HandlerResponse::Continue)
    }
    /// Runs after the handle phase (reverse order), with the final response.
    async fn after(
        &self,
        _event: &InboundEvent,
        _response: &HandlerResponse,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}
