//! Storage crate: persistence of relay correlations and direct-room mappings.
//!
//! ## Modules
//!
//! - [`error`] – Storage error types
//! - [`backend`] – Supported SQL backends and placeholder normalization
//! - [`pool`] – DatabasePool (sqlx `Any` pool bound to one backend)
//! - [`migrations`] – Ordered schema migrations tracked in `migration_version`
//! - [`models`] – RelayedMessage
//! - [`repository`] – CorrelationStore trait
//! - [`correlation_repo`] – SqlCorrelationStore

mod backend;
mod correlation_repo;
mod error;
mod migrations;
mod models;
mod pool;
mod repository;

pub use backend::Backend;
pub use correlation_repo::SqlCorrelationStore;
pub use error::StorageError;
pub use migrations::{latest_version, run_migrations, Migration, MIGRATIONS};
pub use models::RelayedMessage;
pub use pool::DatabasePool;
pub use repository::CorrelationStore;
