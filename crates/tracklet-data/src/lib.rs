#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, missing_docs)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! SQLite-backed state store for Tracklet.
//!
//! One [`Store`] handle owns the connection pool; domain operations are
//! grouped per module (`torrents`, `feeds`, `rules`, `downloaders`, `sites`,
//! `settings`, `rate_limits`, `stats`) as `impl Store` blocks. All queries
//! are runtime-bound with explicit row mapping; timestamps are always bound
//! from the caller so text comparisons stay consistent.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

pub mod downloaders;
pub mod error;
pub mod feeds;
pub mod rate_limits;
pub mod rules;
pub mod settings;
pub mod sites;
pub mod stats;
pub mod torrents;

pub use error::{DataError, Result};
pub use settings::GlobalSettingsRow;
pub use torrents::{TorrentListFilter, TorrentPage, TorrentSort};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Shared handle to the SQLite state store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database at `url` and apply pending
    /// migrations.
    ///
    /// `url` accepts anything SQLite understands, including
    /// `sqlite::memory:` for tests and `sqlite:///path/to/torrents.db`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or a migration
    /// fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|source| DataError::Database {
                operation: "store.connect",
                source,
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // A :memory: database exists per connection; anything above one
        // connection would hand each borrower its own empty schema.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|source| DataError::Database {
                operation: "store.connect",
                source,
            })?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when a migration fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|source| DataError::Migration { source })?;
        info!("state store ready");
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Clamp an unsigned counter into the signed range SQLite stores.
pub(crate) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Recover an unsigned counter from its stored representation.
pub(crate) fn unclamp_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_applies_migrations() {
        let store = Store::connect("sqlite::memory:").await.expect("store");
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM settings_global")
            .fetch_one(store.pool())
            .await
            .expect("settings row");
        assert_eq!(row.0, 1);
    }

    #[test]
    fn clamp_handles_large_values() {
        assert_eq!(clamp_i64(42), 42);
        assert_eq!(clamp_i64(u64::MAX), i64::MAX);
        assert_eq!(unclamp_u64(-1), 0);
        assert_eq!(unclamp_u64(7), 7);
    }
}
