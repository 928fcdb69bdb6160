//! RSS subscription persistence.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracklet_core::RssFeed;
use uuid::Uuid;

use crate::Store;
use crate::error::{DataError, Result};

const FEED_COLUMNS: &str = r"
    SELECT id, site_id, name, url, tag, category, interval_minutes,
           download_sub_path, enabled, pause_on_free_end, created_at,
           updated_at
    FROM rss_subscriptions
";

impl Store {
    /// Insert or update a subscription, replacing its rule associations.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails, including a
    /// [`DataError::Constraint`] when `(site_id, name)` collides with another
    /// subscription.
    pub async fn upsert_feed(&self, feed: &RssFeed) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DataError::db("feed.upsert"))?;

        sqlx::query(
            r"INSERT INTO rss_subscriptions (
                id, site_id, name, url, tag, category, interval_minutes,
                download_sub_path, enabled, pause_on_free_end, created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                site_id = excluded.site_id,
                name = excluded.name,
                url = excluded.url,
                tag = excluded.tag,
                category = excluded.category,
                interval_minutes = excluded.interval_minutes,
                download_sub_path = excluded.download_sub_path,
                enabled = excluded.enabled,
                pause_on_free_end = excluded.pause_on_free_end,
                updated_at = excluded.updated_at",
        )
        .bind(feed.id.to_string())
        .bind(&feed.site_id)
        .bind(&feed.name)
        .bind(&feed.url)
        .bind(feed.tag.as_deref())
        .bind(feed.category.as_deref())
        .bind(i64::from(feed.interval_minutes))
        .bind(feed.download_sub_path.as_deref())
        .bind(feed.enabled)
        .bind(feed.pause_on_free_end)
        .bind(feed.created_at)
        .bind(feed.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DataError::db("feed.upsert"))?;

        sqlx::query("DELETE FROM rss_filter_associations WHERE feed_id = ?")
            .bind(feed.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("feed.upsert"))?;

        for (position, rule_id) in feed.filter_rule_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO rss_filter_associations (feed_id, rule_id, position) VALUES (?, ?, ?)",
            )
            .bind(feed.id.to_string())
            .bind(rule_id.to_string())
            .bind(i64::try_from(position).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("feed.upsert"))?;
        }

        tx.commit().await.map_err(DataError::db("feed.upsert"))?;
        Ok(())
    }

    /// Fetch one subscription by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_feed(&self, id: Uuid) -> Result<Option<RssFeed>> {
        let sql = format!("{FEED_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("feed.get"))?;
        match row {
            Some(row) => {
                let mut feed = feed_from_row(&row)?;
                feed.filter_rule_ids = self.feed_rule_ids(feed.id).await?;
                Ok(Some(feed))
            }
            None => Ok(None),
        }
    }

    /// List subscriptions, optionally scoped to one site or to enabled rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_feeds(&self, site_id: Option<&str>, only_enabled: bool) -> Result<Vec<RssFeed>> {
        let mut query = sqlx::QueryBuilder::new(format!("{FEED_COLUMNS} WHERE 1 = 1"));
        if let Some(site_id) = site_id {
            query.push(" AND site_id = ");
            query.push_bind(site_id.to_string());
        }
        if only_enabled {
            query.push(" AND enabled = 1");
        }
        query.push(" ORDER BY site_id, name");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("feed.list"))?;
        let mut feeds = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut feed = feed_from_row(row)?;
            feed.filter_rule_ids = self.feed_rule_ids(feed.id).await?;
            feeds.push(feed);
        }
        Ok(feeds)
    }

    /// Delete a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the id is unknown.
    pub async fn delete_feed(&self, id: Uuid) -> Result<()> {
        let affected = sqlx::query("DELETE FROM rss_subscriptions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DataError::db("feed.delete"))?
            .rows_affected();
        if affected == 0 {
            return Err(DataError::NotFound {
                entity: "rss_subscription",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn feed_rule_ids(&self, feed_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT rule_id FROM rss_filter_associations WHERE feed_id = ? ORDER BY position",
        )
        .bind(feed_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::db("feed.rule_ids"))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("rule_id")
                    .map_err(DataError::db("feed.rule_ids"))?;
                Uuid::parse_str(&raw).map_err(|_| DataError::Corrupt {
                    column: "rule_id",
                    value: raw,
                })
            })
            .collect()
    }
}

fn feed_from_row(row: &SqliteRow) -> Result<RssFeed> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "feed.decode",
            source,
        }
    }

    let id: String = row.try_get("id").map_err(dec)?;
    let interval: i64 = row.try_get("interval_minutes").map_err(dec)?;
    Ok(RssFeed {
        id: Uuid::parse_str(&id).map_err(|_| DataError::Corrupt {
            column: "id",
            value: id,
        })?,
        site_id: row.try_get("site_id").map_err(dec)?,
        name: row.try_get("name").map_err(dec)?,
        url: row.try_get("url").map_err(dec)?,
        tag: row.try_get("tag").map_err(dec)?,
        category: row.try_get("category").map_err(dec)?,
        interval_minutes: u32::try_from(interval).unwrap_or(0),
        download_sub_path: row.try_get("download_sub_path").map_err(dec)?,
        enabled: row.try_get("enabled").map_err(dec)?,
        pause_on_free_end: row.try_get("pause_on_free_end").map_err(dec)?,
        filter_rule_ids: Vec::new(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(dec)?,
        updated_at: row.try_get("updated_at").map_err(dec)?,
    })
}
