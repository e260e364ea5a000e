//! # relay-core
//!
//! Core types and traits for the relay bot: [`InboundEvent`], [`OutboundMessage`], the
//! [`Transport`] the engine sends through, the [`Handler`] chain contract, error types and
//! tracing initialization. Transport-agnostic; used by storage, relay-engine and relay-matrix.

pub mod error;
pub mod logger;
pub mod transport;
pub mod types;

pub use error::{RelayError, Result, TransportError};
pub use logger::init_tracing;
pub use transport::Transport;
pub use types::{
    strip_edit_fallback, Handler, HandlerResponse, InboundEvent, OutboundMessage, Relation,
    RoomInfo, SendResponse, TransportEvent,
};
