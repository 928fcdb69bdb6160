//! Typed view of the global settings row.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracklet_core::model::MIN_FEED_INTERVAL_MINUTES;
use tracklet_data::GlobalSettingsRow;

use crate::{ConfigError, Result};

const GIB: u64 = 1024 * 1024 * 1024;

/// Service-wide settings consulted on every scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
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
}

impl GlobalSettings {
    /// Build the typed view from the stored row.
    #[must_use]
    pub fn from_row(row: GlobalSettingsRow) -> Self {
        Self {
            default_interval_minutes: row.default_interval_minutes,
            min_free_minutes: row.min_free_minutes,
            download_limit_enabled: row.download_limit_enabled,
            download_speed_limit: row.download_speed_limit,
            torrent_size_gb: row.torrent_size_gb,
            max_retry: row.max_retry,
            auto_delete_on_free_end: row.auto_delete_on_free_end,
            rss_auto_start: row.rss_auto_start,
            archive_retention_days: row.archive_retention_days,
        }
    }

    /// Render the stored row shape.
    #[must_use]
    pub fn to_row(&self, updated_at: DateTime<Utc>) -> GlobalSettingsRow {
        GlobalSettingsRow {
            default_interval_minutes: self.default_interval_minutes,
            min_free_minutes: self.min_free_minutes,
            download_limit_enabled: self.download_limit_enabled,
            download_speed_limit: self.download_speed_limit,
            torrent_size_gb: self.torrent_size_gb,
            max_retry: self.max_retry,
            auto_delete_on_free_end: self.auto_delete_on_free_end,
            rss_auto_start: self.rss_auto_start,
            archive_retention_days: self.archive_retention_days,
            updated_at,
        }
    }

    /// Upper size bound for the default gate; `None` when disabled.
    #[must_use]
    pub fn max_size_bytes(&self) -> Option<u64> {
        if self.torrent_size_gb == 0 {
            None
        } else {
            Some(u64::from(self.torrent_size_gb) * GIB)
        }
    }

    /// Minimum remaining free-window length; `None` when disabled.
    #[must_use]
    pub fn min_free_window(&self) -> Option<Duration> {
        if self.min_free_minutes == 0 {
            None
        } else {
            Some(Duration::minutes(i64::from(self.min_free_minutes)))
        }
    }

    /// Retention window applied by the archive sweep.
    #[must_use]
    pub fn archive_retention(&self) -> Duration {
        Duration::days(i64::from(self.archive_retention_days))
    }

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.default_interval_minutes < MIN_FEED_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidValue {
                field: "default_interval_minutes",
                reason: "below the five-minute floor",
            });
        }
        if self.max_retry == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retry",
                reason: "must allow at least one attempt",
            });
        }
        if self.download_limit_enabled && self.download_speed_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "download_speed_limit",
                reason: "required when the download limit is enabled",
            });
        }
        if self.archive_retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "archive_retention_days",
                reason: "must retain at least one day",
            });
        }
        Ok(())
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_interval_minutes: 30,
            min_free_minutes: 0,
            download_limit_enabled: false,
            download_speed_limit: 0,
            torrent_size_gb: 0,
            max_retry: 3,
            auto_delete_on_free_end: false,
            rss_auto_start: false,
            archive_retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_the_optional_gates() {
        let settings = GlobalSettings::default();
        assert!(settings.max_size_bytes().is_none());
        assert!(settings.min_free_window().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn derived_bounds_convert_units() {
        let settings = GlobalSettings {
            torrent_size_gb: 2,
            min_free_minutes: 30,
            ..GlobalSettings::default()
        };
        assert_eq!(settings.max_size_bytes(), Some(2 * GIB));
        assert_eq!(settings.min_free_window(), Some(Duration::minutes(30)));
    }

    #[test]
    fn validation_guards_each_field() {
        let mut settings = GlobalSettings {
            default_interval_minutes: 3,
            ..GlobalSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.default_interval_minutes = 30;
        settings.download_limit_enabled = true;
        assert!(settings.validate().is_err());

        settings.download_speed_limit = 20 * 1024 * 1024;
        assert!(settings.validate().is_ok());
    }
}
