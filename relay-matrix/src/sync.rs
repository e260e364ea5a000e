//! Event conversion and the sync loop feeding the processing path.

use std::time::Duration;

use matrix_sdk::config::SyncSettings as SdkSyncSettings;
use matrix_sdk::ruma::events::room::member::{
    MembershipChange, MembershipState, OriginalSyncRoomMemberEvent, StrippedRoomMemberEvent,
};
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, Relation as MessageRelation,
};
use matrix_sdk::{LoopCtrl, Room};
use relay_core::{InboundEvent, Relation, RoomInfo, TransportEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::MatrixClient;

/// Converts an `m.room.message` event. Only `m.text` and `m.emote` are relayed, never
/// `m.notice` (bot output). Empty bodies yield `None`.
pub fn inbound_event(room_id: &str, event: &OriginalSyncRoomMessageEvent) -> Option<InboundEvent> {
    let body = match &event.content.msgtype {
        MessageType::Text(content) => content.body.as_str(),
        MessageType::Emote(content) => content.body.as_str(),
        _ => return None,
    };
    if body.trim().is_empty() {
        return None;
    }

    let relation = match &event.content.relates_to {
        Some(MessageRelation::Replacement(replacement)) => Relation::Replaces {
            target_id: replacement.event_id.to_string(),
            new_body: replacement.new_content.msgtype.body().to_string(),
        },
        Some(MessageRelation::Reply { in_reply_to }) => Relation::ReplyTo {
            target_id: in_reply_to.event_id.to_string(),
        },
        _ => Relation::None,
    };

    Some(
        InboundEvent::new(event.event_id.as_str(), room_id, event.sender.as_str(), body)
            .with_relation(relation),
    )
}

/// True when `own_user_id` entered the room with this event. Profile updates re-send a `join`
/// membership and must not count.
pub fn is_own_join(own_user_id: &str, event: &OriginalSyncRoomMemberEvent) -> bool {
    event.state_key.as_str() == own_user_id
        && matches!(
            event.membership_change(),
            MembershipChange::Joined | MembershipChange::InvitationAccepted
        )
}

pub fn is_own_invite(own_user_id: &str, event: &StrippedRoomMemberEvent) -> bool {
    event.state_key.as_str() == own_user_id && event.content.membership == MembershipState::Invite
}

/// Name, canonical alias and joined member count from the SDK's room state.
pub fn room_info(room: &Room) -> RoomInfo {
    RoomInfo {
        room_id: room.room_id().to_string(),
        name: room.name().filter(|name| !name.trim().is_empty()),
        canonical_alias: room.canonical_alias().map(|alias| alias.to_string()),
        member_count: Some(room.joined_members_count()).filter(|count| *count > 0),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Server-side long-poll duration.
    pub timeout: Duration,
    /// Wait after a failed sync.
    pub error_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(15),
        }
    }
}

pub struct SyncLoop {
    client: MatrixClient,
    settings: SyncSettings,
}

impl SyncLoop {
    pub fn new(client: MatrixClient, settings: SyncSettings) -> Self {
        Self { client, settings }
    }

    /// Syncs until the receiver is dropped, forwarding events in sync order. The first sync only
    /// seeds room state; invites pending at that point are still forwarded.
    pub async fn listen(self, tx: mpsc::Sender<TransportEvent>) {
        let client = self.client.inner().clone();
        let own_user_id = self.client.user_id().to_string();

        let token = loop {
            match client.sync_once(SdkSyncSettings::default()).await {
                Ok(response) => break response.next_batch,
                Err(e) => {
                    warn!(error = %e, "Initial Matrix sync failed, retrying");
                    if tx.is_closed() {
                        return;
                    }
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        };
        debug!(rooms = client.joined_rooms().len(), "Initial sync seeded room state");

        for room in client.invited_rooms() {
            let event = TransportEvent::Invited {
                room_id: room.room_id().to_string(),
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        let message_tx = tx.clone();
        client.add_event_handler(move |event: OriginalSyncRoomMessageEvent, room: Room| {
            let tx = message_tx.clone();
            async move {
                if let Some(message) = inbound_event(room.room_id().as_str(), &event) {
                    let event = TransportEvent::Message {
                        event: message,
                        room: room_info(&room),
                    };
                    if tx.send(event).await.is_err() {
                        debug!("Event receiver closed, dropping message");
                    }
                }
            }
        });

        let member_tx = tx.clone();
        let member_user_id = own_user_id.clone();
        client.add_event_handler(move |event: OriginalSyncRoomMemberEvent, room: Room| {
            let tx = member_tx.clone();
            let own_user_id = member_user_id.clone();
            async move {
                if is_own_join(&own_user_id, &event) {
                    let event = TransportEvent::Joined {
                        room: room_info(&room),
                    };
                    if tx.send(event).await.is_err() {
                        debug!("Event receiver closed, dropping join");
                    }
                }
            }
        });

        let invite_tx = tx.clone();
        client.add_event_handler(move |event: StrippedRoomMemberEvent, room: Room| {
            let tx = invite_tx.clone();
            let own_user_id = own_user_id.clone();
            async move {
                if is_own_invite(&own_user_id, &event) {
                    let event = TransportEvent::Invited {
                        room_id: room.room_id().to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        debug!("Event receiver closed, dropping invite");
                    }
                }
            }
        });

        info!(user_id = %self.client.user_id(), "Matrix sync loop started");
        let settings = SdkSyncSettings::default()
            .token(token)
            .timeout(self.settings.timeout);
        let error_backoff = self.settings.error_backoff;
        let result = client
            .sync_with_result_callback(settings, |sync_result| {
                let tx = tx.clone();
                async move {
                    if tx.is_closed() {
                        info!("Event receiver closed, stopping sync loop");
                        return Ok::<LoopCtrl, matrix_sdk::Error>(LoopCtrl::Break);
                    }
                    if let Err(e) = sync_result {
                        warn!(error = %e, "Matrix sync failed, retrying");
                        tokio::time::sleep(error_backoff).await;
                    }
                    Ok::<LoopCtrl, matrix_sdk::Error>(LoopCtrl::Continue)
                }
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "Matrix sync loop ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const BOT: &str = "@relay:x";

    fn message_event(content: Value) -> OriginalSyncRoomMessageEvent {
        serde_json::from_value(json!({
            "type": "m.room.message",
            "event_id": "$op1",
            "sender": "@alice:x",
            "origin_server_ts": 1u64,
            "content": content
        }))
        .expect("valid m.room.message event")
    }

    fn member_event(state_key: &str, content: Value, prev_content: Option<Value>) -> OriginalSyncRoomMemberEvent {
        let mut value = json!({
            "type": "m.room.member",
            "event_id": "$member",
            "sender": state_key,
            "state_key": state_key,
            "origin_server_ts": 1u64,
            "content": content
        });
        if let Some(prev) = prev_content {
            value["unsigned"] = json!({ "prev_content": prev });
        }
        serde_json::from_value(value).expect("valid m.room.member event")
    }

    #[test]
    fn test_text_message_converted() {
        let event = message_event(json!({ "msgtype": "m.text", "body": "hello" }));
        let parsed = inbound_event("!abc:x", &event).unwrap();
        assert_eq!(parsed.id, "$op1");
        assert_eq!(parsed.room_id, "!abc:x");
        assert_eq!(parsed.sender, "@alice:x");
        assert_eq!(parsed.body, "hello");
        assert_eq!(parsed.relation, Relation::None);
    }

    #[test]
    fn test_emote_is_relayed() {
        let event = message_event(json!({ "msgtype": "m.emote", "body": "waves" }));
        assert_eq!(inbound_event("!abc:x", &event).unwrap().body, "waves");
    }

    /// **Test: Notices from other bots are not relayed.**
    ///
    /// **Setup:** An `m.notice` sent by another user.
    /// **Action:** Convert it.
    /// **Expected:** `None`, so bot output never loops between relays.
    #[test]
    fn test_notice_from_other_bot_dropped() {
        let event: OriginalSyncRoomMessageEvent = serde_json::from_value(json!({
            "type": "m.room.message",
            "event_id": "$n1",
            "sender": "@otherbot:x",
            "origin_server_ts": 1u64,
            "content": { "msgtype": "m.notice", "body": "Message relayed" }
        }))
        .unwrap();
        assert!(inbound_event("!abc:x", &event).is_none());
    }

    #[test]
    fn test_unsupported_or_empty_messages_skipped() {
        let image = message_event(json!({ "msgtype": "m.image", "body": "cat.png", "url": "mxc://x/cat" }));
        assert!(inbound_event("!a:x", &image).is_none());

        let empty = message_event(json!({ "msgtype": "m.text", "body": "   " }));
        assert!(inbound_event("!a:x", &empty).is_none());
    }

    #[test]
    fn test_reply_and_edit_relations() {
        let reply = message_event(json!({
            "msgtype": "m.text",
            "body": "> <@relay:x> hello\n\n!reply hi",
            "m.relates_to": { "m.in_reply_to": { "event_id": "$m1" } }
        }));
        assert_eq!(
            inbound_event("!m:x", &reply).unwrap().relation,
            Relation::ReplyTo {
                target_id: "$m1".to_string()
            }
        );

        let edit = message_event(json!({
            "msgtype": "m.text",
            "body": " * !reply hi",
            "m.new_content": { "msgtype": "m.text", "body": "!reply hi" },
            "m.relates_to": { "rel_type": "m.replace", "event_id": "$op0" }
        }));
        assert_eq!(
            inbound_event("!m:x", &edit).unwrap().relation,
            Relation::Replaces {
                target_id: "$op0".to_string(),
                new_body: "!reply hi".to_string()
            }
        );
    }

    #[test]
    fn test_own_join_detected() {
        let fresh = member_event(BOT, json!({ "membership": "join" }), None);
        assert!(is_own_join(BOT, &fresh));

        let accepted = member_event(
            BOT,
            json!({ "membership": "join" }),
            Some(json!({ "membership": "invite" })),
        );
        assert!(is_own_join(BOT, &accepted));

        let other = member_event("@bob:x", json!({ "membership": "join" }), None);
        assert!(!is_own_join(BOT, &other));
    }

    /// **Test: Profile changes are not joins.**
    ///
    /// **Setup:** The bot's member event with `membership: join` whose previous content was
    /// already `join` (a displayname change).
    /// **Action:** Check for an own join.
    /// **Expected:** false, so no welcome notice is posted again.
    #[test]
    fn test_displayname_change_is_not_a_join() {
        let renamed = member_event(
            BOT,
            json!({ "membership": "join", "displayname": "Relay" }),
            Some(json!({ "membership": "join", "displayname": "relay" })),
        );
        assert!(!is_own_join(BOT, &renamed));

        let avatar = member_event(
            BOT,
            json!({ "membership": "join", "avatar_url": "mxc://x/new" }),
            Some(json!({ "membership": "join" })),
        );
        assert!(!is_own_join(BOT, &avatar));
    }

    #[test]
    fn test_own_invite_detected() {
        let invite: StrippedRoomMemberEvent = serde_json::from_value(json!({
            "type": "m.room.member",
            "sender": "@alice:x",
            "state_key": BOT,
            "content": { "membership": "invite" }
        }))
        .unwrap();
        assert!(is_own_invite(BOT, &invite));
        assert!(!is_own_invite("@someone:x", &invite));

        let inviter: StrippedRoomMemberEvent = serde_json::from_value(json!({
            "type": "m.room.member",
            "sender": "@alice:x",
            "state_key": "@alice:x",
            "content": { "membership": "join" }
        }))
        .unwrap();
        assert!(!is_own_invite(BOT, &inviter));
    }
}
