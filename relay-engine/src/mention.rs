//! Mention-only rooms and mention detection.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use relay_core::RoomInfo;

/// `@localpart:server[:port]`, matched case-insensitively so `@Bot:Example.org` still counts.
static USER_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@[a-z0-9._=/+\-]+:[a-z0-9.\-]+(?::[0-9]+)?")
        .expect("user id regex must compile")
});

/// Which rooms require an explicit mention of the bot before a message is relayed.
#[derive(Debug, Clone, Default)]
pub struct MentionPolicy {
    rooms: HashSet<String>,
    always_for_named: bool,
}

impl MentionPolicy {
    /// `rooms` holds room ids or aliases; `always_for_named` extends the rule to every named room.
    pub fn new(rooms: impl IntoIterator<Item = String>, always_for_named: bool) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
            always_for_named,
        }
    }

    pub fn requires_mention(&self, room: &RoomInfo) -> bool {
        if self.always_for_named && room.is_named() {
            return true;
        }
        room.identifiers().any(|id| self.rooms.contains(id))
    }
}

/// User-id tokens in `text`, with trailing sentence punctuation dropped.
pub fn mentioned_user_ids(text: &str) -> Vec<&str> {
    USER_ID_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', '-']))
        .collect()
}

/// Localpart of a user id (`@bot:example.org` → `bot`).
pub fn localpart(user_id: &str) -> &str {
    let trimmed = user_id.strip_prefix('@').unwrap_or(user_id);
    trimmed.split(':').next().unwrap_or(trimmed)
}

/// True when `body` mentions `bot_user_id`: the full id or its localpart as a case-insensitive
/// substring, or a user-id token equal to the bot's id.
pub fn is_mentioned(body: &str, bot_user_id: &str) -> bool {
    let lowered = body.to_lowercase();
    let bot_lower = bot_user_id.to_lowercase();

    if lowered.contains(&bot_lower) {
        return true;
    }
    let local = localpart(&bot_lower);
    if !local.is_empty() && lowered.contains(local) {
        return true;
    }
    mentioned_user_ids(body)
        .into_iter()
        .any(|id| id.eq_ignore_ascii_case(bot_user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "@relay:example.org";

    #[test]
    fn test_requires_mention_by_id_or_alias() {
        let policy = MentionPolicy::new(
            vec!["!quiet:example.org".to_string(), "#lobby:example.org".to_string()],
            false,
        );

        assert!(policy.requires_mention(&RoomInfo::new("!quiet:example.org")));
        assert!(policy.requires_mention(
            &RoomInfo::new("!other:example.org").with_alias("#lobby:example.org")
        ));
        assert!(!policy.requires_mention(&RoomInfo::new("!loud:example.org")));
        assert!(!policy.requires_mention(&RoomInfo::new("!named:example.org").with_name("Named")));
    }

    #[test]
    fn test_always_for_named_rooms() {
        let policy = MentionPolicy::new(Vec::new(), true);
        assert!(policy.requires_mention(&RoomInfo::new("!a:example.org").with_name("Team")));
        assert!(policy.requires_mention(&RoomInfo::new("!a:example.org").with_alias("#t:example.org")));
        assert!(!policy.requires_mention(&RoomInfo::new("!dm:example.org").with_member_count(2)));
    }

    #[test]
    fn test_is_mentioned_by_full_id_and_localpart() {
        assert!(is_mentioned("hey @relay:example.org help", BOT));
        assert!(is_mentioned("Relay, are you there?", BOT));
        assert!(is_mentioned("@RELAY:EXAMPLE.ORG ping", BOT));
        assert!(!is_mentioned("hello everyone", BOT));
        assert!(!is_mentioned("ping @alice:example.org", BOT));
    }

    #[test]
    fn test_mentioned_user_ids() {
        let ids = mentioned_user_ids("cc @alice:example.org and @bob:matrix.org:8448.");
        assert_eq!(ids, vec!["@alice:example.org", "@bob:matrix.org:8448"]);
        assert!(mentioned_user_ids("no mentions here").is_empty());
    }

    #[test]
    fn test_localpart() {
        assert_eq!(localpart("@relay:example.org"), "relay");
        assert_eq!(localpart("relay"), "relay");
    }
}
