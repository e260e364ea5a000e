//! Connection pool wrapper for the storage crate.

use std::borrow::Cow;

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use tracing::info;

use crate::backend::Backend;
use crate::error::StorageError;

/// Manages a single sqlx `Any` pool together with the backend it talks to.
#[derive(Clone)]
pub struct DatabasePool {
    pool: AnyPool,
    backend: Backend,
}

impl DatabasePool {
    /// Creates a pool for the given database URL; SQLite files are created if missing.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let backend = Backend::from_url(database_url)?;
        info!(backend = ?backend, "Initializing database pool");

        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(backend.max_connections())
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&backend.connection_url(database_url))
            .await?;

        Ok(Self { pool, backend })
    }

    /// Returns the underlying pool for running queries.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Query text with placeholders in this backend's syntax.
    pub fn sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        self.backend.normalize(sql)
    }
}
