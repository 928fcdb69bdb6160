//! Global settings persistence: one row, typed columns.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::Store;
use crate::error::{DataError, Result};
use crate::unclamp_u64;

/// The single `settings_global` row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettingsRow {
    /// Default feed poll interval in minutes.
    pub default_interval_minutes: u32,
    /// Minimum remaining free-window length for the default gate; zero
    /// disables the check.
    pub min_free_minutes: u32,
    /// Whether the completable-within-window check runs.
    pub download_limit_enabled: bool,
    /// Assumed download speed in bytes per second for that check.
    pub download_speed_limit: u64,
    /// Maximum accepted torrent size in GiB; zero disables the check.
    pub torrent_size_gb: u32,
    /// Retry budget for transient failures.
    pub max_retry: u32,
    /// Delete (with data) instead of pausing when a free window expires.
    pub auto_delete_on_free_end: bool,
    /// Start the persistent scheduler on process boot.
    pub rss_auto_start: bool,
    /// Days a terminal record survives before archival.
    pub archive_retention_days: u32,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Store {
    /// Load the global settings row.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn load_global_settings(&self) -> Result<GlobalSettingsRow> {
        let row = sqlx::query(
            r"SELECT default_interval_minutes, min_free_minutes,
                     download_limit_enabled, download_speed_limit,
                     torrent_size_gb, max_retry, auto_delete_on_free_end,
                     rss_auto_start, archive_retention_days, updated_at
              FROM settings_global WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DataError::db("settings.load"))?;

        fn dec(source: sqlx::Error) -> DataError {
            DataError::Database {
                operation: "settings.decode",
                source,
            }
        }

        let to_u32 = |v: i64| u32::try_from(v).unwrap_or(0);
        Ok(GlobalSettingsRow {
            default_interval_minutes: to_u32(
                row.try_get("default_interval_minutes").map_err(dec)?,
            ),
            min_free_minutes: to_u32(row.try_get("min_free_minutes").map_err(dec)?),
            download_limit_enabled: row.try_get("download_limit_enabled").map_err(dec)?,
            download_speed_limit: unclamp_u64(row.try_get("download_speed_limit").map_err(dec)?),
            torrent_size_gb: to_u32(row.try_get("torrent_size_gb").map_err(dec)?),
            max_retry: to_u32(row.try_get("max_retry").map_err(dec)?),
            auto_delete_on_free_end: row.try_get("auto_delete_on_free_end").map_err(dec)?,
            rss_auto_start: row.try_get("rss_auto_start").map_err(dec)?,
            archive_retention_days: to_u32(row.try_get("archive_retention_days").map_err(dec)?),
            updated_at: row.try_get("updated_at").map_err(dec)?,
        })
    }

    /// Persist the global settings row.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn save_global_settings(
        &self,
        settings: &GlobalSettingsRow,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"UPDATE settings_global SET
                default_interval_minutes = ?, min_free_minutes = ?,
                download_limit_enabled = ?, download_speed_limit = ?,
                torrent_size_gb = ?, max_retry = ?,
                auto_delete_on_free_end = ?, rss_auto_start = ?,
                archive_retention_days = ?, updated_at = ?
              WHERE id = 1",
        )
        .bind(i64::from(settings.default_interval_minutes))
        .bind(i64::from(settings.min_free_minutes))
        .bind(settings.download_limit_enabled)
        .bind(crate::clamp_i64(settings.download_speed_limit))
        .bind(i64::from(settings.torrent_size_gb))
        .bind(i64::from(settings.max_retry))
        .bind(settings.auto_delete_on_free_end)
        .bind(settings.rss_auto_start)
        .bind(i64::from(settings.archive_retention_days))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("settings.save"))?;
        Ok(())
    }
}
