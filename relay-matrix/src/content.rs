//! Event content for outbound messages and reactions.

use matrix_sdk::ruma::events::reaction::ReactionEventContent;
use matrix_sdk::ruma::events::relation::{Annotation, InReplyTo, Replacement};
use matrix_sdk::ruma::events::room::message::{Relation, RoomMessageEventContent};
use matrix_sdk::ruma::OwnedEventId;
use relay_core::{OutboundMessage, TransportError};

use crate::error::parse_id;

fn body_content(notice: bool, markdown: bool, body: &str) -> RoomMessageEventContent {
    match (notice, markdown) {
        (true, true) => RoomMessageEventContent::notice_markdown(body),
        (true, false) => RoomMessageEventContent::notice_plain(body),
        (false, true) => RoomMessageEventContent::text_markdown(body),
        (false, false) => RoomMessageEventContent::text_plain(body),
    }
}

/// `m.room.message` content. Edits carry the new content in `m.new_content` behind a `"* "`
/// fallback body; replies carry `m.in_reply_to`.
pub fn message_content(message: &OutboundMessage) -> Result<RoomMessageEventContent, TransportError> {
    let content = body_content(message.notice, message.markdown, &message.body);

    if let Some(target) = &message.replaces {
        let target: OwnedEventId = parse_id(target)?;
        let mut fallback = body_content(
            message.notice,
            message.markdown,
            &format!("* {}", message.body),
        );
        fallback.relates_to = Some(Relation::Replacement(Replacement::new(
            target,
            content.into(),
        )));
        return Ok(fallback);
    }

    let mut content = content;
    if let Some(target) = &message.reply_to {
        content.relates_to = Some(Relation::Reply {
            in_reply_to: InReplyTo::new(parse_id(target)?),
        });
    }
    Ok(content)
}

/// `m.reaction` content annotating `event_id` with `key`.
pub fn reaction_content(event_id: &str, key: &str) -> Result<ReactionEventContent, TransportError> {
    Ok(ReactionEventContent::new(Annotation::new(
        parse_id(event_id)?,
        key.to_string(),
    )))
}
