//! # relay-matrix
//!
//! Matrix transport on `matrix-sdk`. [`MatrixClient`] restores or logs in a session and
//! implements [`relay_core::Transport`]; [`SyncLoop`] drives the SDK sync and turns room events
//! into [`relay_core::TransportEvent`]s for the processing path.

pub mod client;
pub mod content;
pub mod error;
pub mod sync;

pub use client::MatrixClient;
pub use content::{message_content, reaction_content};
pub use error::{error_from_kind, error_from_response, from_http_error, from_sdk_error};
pub use sync::{inbound_event, is_own_invite, is_own_join, room_info, SyncLoop, SyncSettings};
