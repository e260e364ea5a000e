//! Storage error types.
//!
//! Used by the correlation store, the pool and the migration runner.

use thiserror::Error;

/// Errors that can occur when using storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    /// A correlation with the same origin or relay event id already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Migration to v{version} failed: {reason}")]
    Migration { version: i64, reason: String },
    #[error("Invalid database url: {0}")]
    InvalidUrl(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// True when `err` is a unique-constraint violation on either backend.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // 23505: PostgreSQL unique_violation; 2067/1555: SQLite CONSTRAINT_UNIQUE/PRIMARYKEY
            db.is_unique_violation()
                || matches!(db.code().as_deref(), Some("23505" | "2067" | "1555"))
        }
        _ => false,
    }
}
