//! Per-site user configuration persistence.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracklet_core::SiteConfig;
use uuid::Uuid;

use crate::Store;
use crate::error::{DataError, Result};

const CONFIG_COLUMNS: &str = r"
    SELECT site_id, enabled, cookie, api_key, passkey, rate_limit,
           rate_burst, rate_window_secs, rate_window_limit, downloader_id
    FROM site_settings
";

impl Store {
    /// Insert or update a site configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn upsert_site_config(
        &self,
        config: &SiteConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"INSERT INTO site_settings (
                site_id, enabled, cookie, api_key, passkey, rate_limit,
                rate_burst, rate_window_secs, rate_window_limit,
                downloader_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (site_id) DO UPDATE SET
                enabled = excluded.enabled,
                cookie = excluded.cookie,
                api_key = excluded.api_key,
                passkey = excluded.passkey,
                rate_limit = excluded.rate_limit,
                rate_burst = excluded.rate_burst,
                rate_window_secs = excluded.rate_window_secs,
                rate_window_limit = excluded.rate_window_limit,
                downloader_id = excluded.downloader_id,
                updated_at = excluded.updated_at",
        )
        .bind(&config.site_id)
        .bind(config.enabled)
        .bind(config.cookie.as_deref())
        .bind(config.api_key.as_deref())
        .bind(config.passkey.as_deref())
        .bind(config.rate_limit)
        .bind(config.rate_burst.map(i64::from))
        .bind(config.rate_window_secs.map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .bind(config.rate_window_limit.map(i64::from))
        .bind(config.downloader_id.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("site_config.upsert"))?;
        Ok(())
    }

    /// Fetch one site configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_site_config(&self, site_id: &str) -> Result<Option<SiteConfig>> {
        let sql = format!("{CONFIG_COLUMNS} WHERE site_id = ?");
        let row = sqlx::query(&sql)
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("site_config.get"))?;
        row.map(|r| config_from_row(&r)).transpose()
    }

    /// List all site configurations, ordered by site id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_site_configs(&self) -> Result<Vec<SiteConfig>> {
        let sql = format!("{CONFIG_COLUMNS} ORDER BY site_id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("site_config.list"))?;
        rows.iter().map(config_from_row).collect()
    }

    /// Delete a site configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the site has no stored
    /// configuration.
    pub async fn delete_site_config(&self, site_id: &str) -> Result<()> {
        let affected = sqlx::query("DELETE FROM site_settings WHERE site_id = ?")
            .bind(site_id)
            .execute(&self.pool)
            .await
            .map_err(DataError::db("site_config.delete"))?
            .rows_affected();
        if affected == 0 {
            return Err(DataError::NotFound {
                entity: "site_config",
                key: site_id.to_string(),
            });
        }
        Ok(())
    }
}

fn config_from_row(row: &SqliteRow) -> Result<SiteConfig> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "site_config.decode",
            source,
        }
    }

    let downloader_id: Option<String> = row.try_get("downloader_id").map_err(dec)?;
    let rate_burst: Option<i64> = row.try_get("rate_burst").map_err(dec)?;
    let rate_window_secs: Option<i64> = row.try_get("rate_window_secs").map_err(dec)?;
    let rate_window_limit: Option<i64> = row.try_get("rate_window_limit").map_err(dec)?;

    Ok(SiteConfig {
        site_id: row.try_get("site_id").map_err(dec)?,
        enabled: row.try_get("enabled").map_err(dec)?,
        cookie: row.try_get("cookie").map_err(dec)?,
        api_key: row.try_get("api_key").map_err(dec)?,
        passkey: row.try_get("passkey").map_err(dec)?,
        rate_limit: row.try_get("rate_limit").map_err(dec)?,
        rate_burst: rate_burst.and_then(|v| u32::try_from(v).ok()),
        rate_window_secs: rate_window_secs.and_then(|v| u64::try_from(v).ok()),
        rate_window_limit: rate_window_limit.and_then(|v| u32::try_from(v).ok()),
        downloader_id: downloader_id
            .map(|raw| {
                Uuid::parse_str(&raw).map_err(|_| DataError::Corrupt {
                    column: "downloader_id",
                    value: raw,
                })
            })
            .transpose()?,
    })
}
