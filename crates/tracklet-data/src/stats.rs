//! Per-site account statistics snapshots.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracklet_core::UserStats;

use crate::error::{DataError, Result};
use crate::{Store, clamp_i64, unclamp_u64};

/// Stored snapshot of one site's account statistics.
#[derive(Debug, Clone)]
pub struct UserStatsSnapshot {
    /// Owning site id.
    pub site_id: String,
    /// The statistics as last fetched.
    pub stats: UserStats,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

impl Store {
    /// Replace a site's snapshot with a fresh fetch.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn upsert_user_stats(
        &self,
        site_id: &str,
        stats: &UserStats,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"INSERT INTO user_stats (
                site_id, username, uploaded_bytes, downloaded_bytes, ratio,
                bonus, level, join_date, last_access, seeding, leeching,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (site_id) DO UPDATE SET
                username = excluded.username,
                uploaded_bytes = excluded.uploaded_bytes,
                downloaded_bytes = excluded.downloaded_bytes,
                ratio = excluded.ratio,
                bonus = excluded.bonus,
                level = excluded.level,
                join_date = excluded.join_date,
                last_access = excluded.last_access,
                seeding = excluded.seeding,
                leeching = excluded.leeching,
                updated_at = excluded.updated_at",
        )
        .bind(site_id)
        .bind(stats.username.as_deref())
        .bind(clamp_i64(stats.uploaded_bytes))
        .bind(clamp_i64(stats.downloaded_bytes))
        .bind(stats.ratio)
        .bind(stats.bonus)
        .bind(stats.level.as_deref())
        .bind(stats.join_date)
        .bind(stats.last_access)
        .bind(i64::from(stats.seeding))
        .bind(i64::from(stats.leeching))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("user_stats.upsert"))?;
        Ok(())
    }

    /// Fetch one site's snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_user_stats(&self, site_id: &str) -> Result<Option<UserStatsSnapshot>> {
        let row = sqlx::query(
            r"SELECT site_id, username, uploaded_bytes, downloaded_bytes,
                     ratio, bonus, level, join_date, last_access, seeding,
                     leeching, updated_at
              FROM user_stats WHERE site_id = ?",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::db("user_stats.get"))?;
        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// List all snapshots, ordered by site id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_user_stats(&self) -> Result<Vec<UserStatsSnapshot>> {
        let rows = sqlx::query(
            r"SELECT site_id, username, uploaded_bytes, downloaded_bytes,
                     ratio, bonus, level, join_date, last_access, seeding,
                     leeching, updated_at
              FROM user_stats ORDER BY site_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::db("user_stats.list"))?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<UserStatsSnapshot> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "user_stats.decode",
            source,
        }
    }

    let seeding: i64 = row.try_get("seeding").map_err(dec)?;
    let leeching: i64 = row.try_get("leeching").map_err(dec)?;
    Ok(UserStatsSnapshot {
        site_id: row.try_get("site_id").map_err(dec)?,
        stats: UserStats {
            username: row.try_get("username").map_err(dec)?,
            uploaded_bytes: unclamp_u64(row.try_get("uploaded_bytes").map_err(dec)?),
            downloaded_bytes: unclamp_u64(row.try_get("downloaded_bytes").map_err(dec)?),
            ratio: row.try_get("ratio").map_err(dec)?,
            bonus: row.try_get("bonus").map_err(dec)?,
            level: row.try_get("level").map_err(dec)?,
            join_date: row.try_get("join_date").map_err(dec)?,
            last_access: row.try_get("last_access").map_err(dec)?,
            seeding: u32::try_from(seeding).unwrap_or(0),
            leeching: u32::try_from(leeching).unwrap_or(0),
        },
        updated_at: row.try_get("updated_at").map_err(dec)?,
    })
}
