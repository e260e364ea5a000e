//! # relay-bot
//!
//! Wires configuration, the correlation store, the Matrix transport and the relay engine together.
//!
//! - [`config`]: `RelayConfig` loaded from environment variables
//! - [`cli`]: `run`, `migrate` and `lookup` subcommands
//! - [`runner`]: start-up sequence and administrative helpers

pub mod cli;
pub mod config;
pub mod runner;

pub use cli::{Cli, Commands};
pub use config::{MatrixAuth, RelayConfig, DEFAULT_DATABASE_URL};
pub use runner::{lookup, migrate, resolve_room, run_bot, LookupKey};
