//! Ordered schema migrations.
//!
//! The applied version lives in the single row of `migration_version`. At startup every
//! migration with a higher version is applied in order, each in its own transaction together
//! with the version bump, so a migration is applied exactly once. Any failure is fatal.

use sqlx::Row;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::StorageError;
use crate::pool::DatabasePool;

/// One schema step. Statements are given per backend where their DDL differs.
#[derive(Debug)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    sqlite: &'static [&'static str],
    postgres: &'static [&'static str],
}

impl Migration {
    pub fn statements(&self, backend: Backend) -> &'static [&'static str] {
        match backend {
            Backend::Sqlite => self.sqlite,
            Backend::Postgres => self.postgres,
        }
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create messages correlation table",
        sqlite: &[r#"
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin_event_id TEXT NOT NULL CONSTRAINT messages_origin_event_id_unique UNIQUE,
                relay_event_id TEXT NOT NULL CONSTRAINT messages_relay_event_id_unique UNIQUE,
                room_id TEXT NOT NULL,
                sender TEXT NOT NULL
            )
            "#],
        postgres: &[r#"
            CREATE TABLE messages (
                id SERIAL PRIMARY KEY,
                origin_event_id TEXT NOT NULL CONSTRAINT messages_origin_event_id_unique UNIQUE,
                relay_event_id TEXT NOT NULL CONSTRAINT messages_relay_event_id_unique UNIQUE,
                room_id TEXT NOT NULL,
                sender TEXT NOT NULL
            )
            "#],
    },
    Migration {
        version: 2,
        description: "create directs table",
        sqlite: &[r#"
            CREATE TABLE directs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL CONSTRAINT directs_user_id_unique UNIQUE,
                room_id TEXT NOT NULL
            )
            "#],
        postgres: &[r#"
            CREATE TABLE directs (
                id SERIAL PRIMARY KEY,
                user_id TEXT NOT NULL CONSTRAINT directs_user_id_unique UNIQUE,
                room_id TEXT NOT NULL
            )
            "#],
    },
    Migration {
        version: 3,
        description: "index messages by origin room",
        sqlite: &["CREATE INDEX messages_room_id_idx ON messages (room_id)"],
        postgres: &["CREATE INDEX messages_room_id_idx ON messages (room_id)"],
    },
];

/// Highest version in [`MIGRATIONS`].
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Brings the schema to [`latest_version`]. Returns the version the database is at afterwards.
pub async fn run_migrations(db: &DatabasePool) -> Result<i64, StorageError> {
    let current = current_version(db).await?;
    debug!(current, latest = latest_version(), "Checking for necessary database migrations");

    let mut version = current;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        if migration.version != version + 1 {
            return Err(StorageError::Migration {
                version: migration.version,
                reason: format!("migrations must be sequential, expected v{}", version + 1),
            });
        }
        info!(
            from = version,
            to = migration.version,
            description = migration.description,
            "Migrating the database"
        );
        apply(db, migration).await.map_err(|e| StorageError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
        version = migration.version;
        info!(version, "Database migrated");
    }

    Ok(version)
}

/// Reads the applied version, creating the tracking table (at version 0) on first boot.
async fn current_version(db: &DatabasePool) -> Result<i64, StorageError> {
    sqlx::query("CREATE TABLE IF NOT EXISTS migration_version (version BIGINT NOT NULL)")
        .execute(db.pool())
        .await?;

    let row = sqlx::query("SELECT version FROM migration_version")
        .fetch_optional(db.pool())
        .await?;

    match row {
        Some(row) => Ok(row.try_get::<i64, _>("version")?),
        None => {
            info!("Performing initial database setup");
            sqlx::query(&db.sql("INSERT INTO migration_version (version) VALUES (?)"))
                .bind(0_i64)
                .execute(db.pool())
                .await?;
            Ok(0)
        }
    }
}

async fn apply(db: &DatabasePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = db.pool().begin().await?;
    for statement in migration.statements(db.backend()) {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query(&db.sql("UPDATE migration_version SET version = ?"))
        .bind(migration.version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
