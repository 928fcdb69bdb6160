//! Durable journal for the per-site sliding-window limiter.
//!
//! The limiter appends one row per issued request; on startup it replays the
//! rows still inside the widest configured window, so a restart cannot reset
//! a site's hourly budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracklet_core::RateLimitJournal;

use crate::Store;
use crate::error::DataError;

#[async_trait]
impl RateLimitJournal for Store {
    async fn record_hit(&self, site_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO site_rate_limits (site_id, hit_at) VALUES (?, ?)")
            .bind(site_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(DataError::db("rate_limit.record"))?;
        Ok(())
    }

    async fn load_hits(
        &self,
        site_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        let rows = sqlx::query(
            "SELECT hit_at FROM site_rate_limits WHERE site_id = ? AND hit_at >= ? ORDER BY hit_at",
        )
        .bind(site_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::db("rate_limit.load"))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            hits.push(
                row.try_get("hit_at")
                    .map_err(DataError::db("rate_limit.load"))?,
            );
        }
        Ok(hits)
    }

    async fn prune_hits(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let affected = sqlx::query("DELETE FROM site_rate_limits WHERE hit_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(DataError::db("rate_limit.prune"))?
            .rows_affected();
        Ok(affected)
    }
}
