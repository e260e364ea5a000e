//! Operator commands: a closed set of parsed variants instead of substring checks.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{Handler, HandlerResponse, InboundEvent, OutboundMessage, Result, RoomInfo};
use storage::CorrelationStore;
use tracing::{error, info, warn};

use crate::dispatcher::RateLimitedDispatcher;

pub const DEFAULT_COMMAND_PREFIX: &str = "!c";

/// Standalone shorthand for `message`.
const MESSAGE_SHORTHAND: &str = "!message";

const MESSAGE_USAGE: &str = "Usage: `message <room id | #alias | @user> <text>`";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Echo(String),
    Help(Option<String>),
    Message { target: String, text: String },
    /// `message` with a missing target or text.
    MessageUsage,
    Unknown(String),
}

impl Command {
    /// Parses the text after the command prefix.
    pub fn parse(input: &str) -> Command {
        let input = input.trim();
        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };

        match name.to_lowercase().as_str() {
            "" => Command::Help(None),
            "echo" => Command::Echo(rest.to_string()),
            "help" => Command::Help(rest.split_whitespace().next().map(str::to_lowercase)),
            "message" => match rest.split_once(char::is_whitespace) {
                Some((target, text)) if !text.trim().is_empty() => Command::Message {
                    target: target.to_string(),
                    text: text.trim().to_string(),
                },
                _ => Command::MessageUsage,
            },
            _ => Command::Unknown(name.to_string()),
        }
    }
}

/// Command text when `body` is addressed to the bot: `"{prefix} ..."` or the `!message` shorthand.
pub fn command_text<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    let body = body.trim_start();
    if let Some(rest) = body.strip_prefix(prefix) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(rest.trim());
        }
    }
    if body.starts_with(MESSAGE_SHORTHAND) {
        let after = &body[MESSAGE_SHORTHAND.len()..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            return Some(&body[1..]);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Room(String),
    Alias(String),
    User(String),
}

impl MessageTarget {
    pub fn parse(target: &str) -> Option<MessageTarget> {
        if !target.contains(':') {
            return None;
        }
        match target.chars().next()? {
            '!' => Some(MessageTarget::Room(target.to_string())),
            '#' => Some(MessageTarget::Alias(target.to_string())),
            '@' => Some(MessageTarget::User(target.to_string())),
            _ => None,
        }
    }
}

pub struct CommandHandler {
    prefix: String,
    reply_marker: String,
    management_room_id: String,
    dispatcher: Arc<RateLimitedDispatcher>,
    store: Arc<dyn CorrelationStore>,
}

impl CommandHandler {
    pub fn new(
        prefix: impl Into<String>,
        management_room_id: impl Into<String>,
        dispatcher: Arc<RateLimitedDispatcher>,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            reply_marker: crate::resolver::DEFAULT_REPLY_MARKER.to_string(),
            management_room_id: management_room_id.into(),
            dispatcher,
            store,
        }
    }

    /// Marker named in the help text.
    pub fn with_reply_marker(mut self, marker: impl Into<String>) -> Self {
        self.reply_marker = marker.into();
        self
    }

    pub async fn execute(&self, command: Command, event: &InboundEvent, room: &RoomInfo) {
        let in_management = room.room_id == self.management_room_id;
        let reply = match command {
            Command::Echo(text) => Some(text),
            Command::Help(topic) => Some(self.help(topic.as_deref())),
            Command::Message { target, text } if in_management => {
                Some(self.send_to_target(&target, &text).await)
            }
            Command::MessageUsage if in_management => Some(MESSAGE_USAGE.to_string()),
            Command::Message { .. } | Command::MessageUsage => {
                warn!(room_id = %room.room_id, sender = %event.sender, "message command outside management room");
                None
            }
            Command::Unknown(name) => Some(format!(
                "Unknown command '{}'. Try the 'help' command for more information.",
                name
            )),
        };

        if let Some(text) = reply {
            let notice = OutboundMessage::notice(&room.room_id, text);
            if let Err(e) = self.dispatcher.send(&notice).await {
                error!(room_id = %room.room_id, error = %e, "Failed to send command response");
            }
        }
    }

    fn help(&self, topic: Option<&str>) -> String {
        match topic {
            None => "Hello, I relay messages from other rooms into this one. \
                     Use `help commands` to view available commands, or `help rules` for how replies work."
                .to_string(),
            Some("commands") => format!(
                "Available commands (prefix `{prefix}`):\n\n\
                 - `{prefix} echo <text>`: repeat the text\n\
                 - `{prefix} help [commands|rules]`: show this help\n\
                 - `{prefix} message <room id | #alias | @user> <text>` or `!message ...`: send a message (management room only)",
                prefix = self.prefix
            ),
            Some("rules") => format!(
                "Reply to a relayed message with `{marker} <text>` to send the text back to the original room. \
                 Edit that reply (keeping the `{marker}` prefix) to edit the delivered message.",
                marker = self.reply_marker
            ),
            Some(_) => "Unknown help topic!".to_string(),
        }
    }

    async fn send_to_target(&self, target: &str, text: &str) -> String {
        let Some(parsed) = MessageTarget::parse(target) else {
            return format!("Unknown target '{}'. {}", target, MESSAGE_USAGE);
        };

        let result = match self.resolve_target(&parsed).await {
            Ok(room_id) => self
                .dispatcher
                .send(&OutboundMessage::text(&room_id, text))
                .await
                .map(|_| room_id)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };

        match result {
            Ok(room_id) => {
                info!(target, room_id = %room_id, "Delivered operator message");
                format!("Message was delivered to {}.", target)
            }
            Err(e) => {
                error!(target, error = %e, "Failed to deliver operator message");
                format!("Failed to deliver message to {}! Error: {}", target, e)
            }
        }
    }

    /// Room id for a target; users get their stored direct room, created on first use.
    async fn resolve_target(&self, target: &MessageTarget) -> std::result::Result<String, String> {
        match target {
            MessageTarget::Room(room_id) => Ok(room_id.clone()),
            MessageTarget::Alias(alias) => self
                .dispatcher
                .resolve_room_alias(alias)
                .await
                .map_err(|e| e.to_string()),
            MessageTarget::User(user_id) => {
                match self.store.get_direct_room(user_id).await {
                    Ok(Some(room_id)) => return Ok(room_id),
                    Ok(None) => {}
                    Err(e) => return Err(e.to_string()),
                }
                let room_id = self
                    .dispatcher
                    .create_direct_room(user_id)
                    .await
                    .map_err(|e| e.to_string())?;
                if let Err(e) = self.store.store_direct_room(user_id, &room_id).await {
                    warn!(user_id = %user_id, error = %e, "Could not store direct room");
                }
                info!(user_id = %user_id, room_id = %room_id, "Created direct room");
                Ok(room_id)
            }
        }
    }
}

#[async_trait]
impl Handler for CommandHandler {
    async fn handle(&self, event: &InboundEvent, room: &RoomInfo) -> Result<HandlerResponse> {
        let Some(text) = command_text(event.text(), &self.prefix) else {
            return Ok(HandlerResponse::Continue);
        };
        let command = Command::parse(text);
        info!(event_id = %event.id, command = ?command, "Executing command");
        self.execute(command, event, room).await;
        Ok(HandlerResponse::Stop)
    }
}
