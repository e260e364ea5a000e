//! Persistence models.

mod relayed_message;

pub use relayed_message::RelayedMessage;
