//! Supported SQL backends.
//!
//! Queries are written once with `?` positional placeholders; [`Backend::normalize`]
//! rewrites them to `$1, $2, …` for PostgreSQL.

use std::borrow::Cow;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Embedded SQLite database (`sqlite://path`, `sqlite::memory:`).
    Sqlite,
    /// Client-server PostgreSQL (`postgres://…`, `postgresql://…`).
    Postgres,
}

impl Backend {
    /// Picks the backend from the URL scheme.
    pub fn from_url(database_url: &str) -> Result<Self, StorageError> {
        if database_url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")
        {
            Ok(Backend::Postgres)
        } else {
            Err(StorageError::InvalidUrl(format!(
                "expected sqlite:// or postgres:// url, got '{}'",
                database_url
            )))
        }
    }

    /// Rewrites `?` placeholders outside string literals into the backend's syntax.
    pub fn normalize<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        match self {
            Backend::Sqlite => Cow::Borrowed(sql),
            Backend::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut in_literal = false;
                let mut index = 0;
                for ch in sql.chars() {
                    match ch {
                        '\'' => {
                            in_literal = !in_literal;
                            out.push(ch);
                        }
                        '?' if !in_literal => {
                            index += 1;
                            out.push('$');
                            out.push_str(&index.to_string());
                        }
                        _ => out.push(ch),
                    }
                }
                Cow::Owned(out)
            }
        }
    }

    /// Connection URL handed to sqlx. File-backed SQLite databases are created when missing.
    pub(crate) fn connection_url(&self, database_url: &str) -> String {
        match self {
            Backend::Sqlite if !database_url.contains(":memory:") && !database_url.contains('?') => {
                format!("{}?mode=rwc", database_url)
            }
            _ => database_url.to_string(),
        }
    }

    /// SQLite allows one writer; an in-memory database also only lives on its single connection.
    pub(crate) fn max_connections(&self) -> u32 {
        match self {
            Backend::Sqlite => 1,
            Backend::Postgres => 5,
        }
    }
}
