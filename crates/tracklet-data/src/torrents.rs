//! Torrent record persistence: idempotent upsert, listing, lifecycle
//! mutations and archival.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::debug;
use tracklet_core::{DiscountLevel, DownloadSource, TorrentRecord};
use uuid::Uuid;

use crate::error::{DataError, Result};
use crate::{Store, clamp_i64, unclamp_u64};

/// Filter applied by [`Store::list_torrents`].
#[derive(Debug, Clone, Default)]
pub struct TorrentListFilter {
    /// Only records with (or without) a fetched payload.
    pub downloaded: Option<bool>,
    /// Only records with the given push outcome.
    pub pushed: Option<bool>,
    /// Only records whose promotion has (or has not) expired.
    pub expired: Option<bool>,
    /// Only records belonging to this site.
    pub site_id: Option<String>,
    /// Substring match against title or tag.
    pub keyword: Option<String>,
}

/// Orderings supported by [`Store::list_torrents`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TorrentSort {
    /// Oldest first.
    CreatedAtAsc,
    /// Newest first.
    #[default]
    CreatedAtDesc,
    /// Most recently pushed first.
    PushTimeDesc,
}

impl TorrentSort {
    const fn order_clause(self) -> &'static str {
        match self {
            Self::CreatedAtAsc => " ORDER BY created_at ASC, id ASC",
            Self::CreatedAtDesc => " ORDER BY created_at DESC, id DESC",
            Self::PushTimeDesc => " ORDER BY push_time DESC, id DESC",
        }
    }
}

/// One page of torrent records plus the unpaged total.
#[derive(Debug, Clone)]
pub struct TorrentPage {
    /// Records on this page.
    pub records: Vec<TorrentRecord>,
    /// Total records matching the filter.
    pub total: u64,
    /// One-based page number echoed back.
    pub page: u32,
    /// Page size echoed back.
    pub page_size: u32,
}

/// Fields written together when a push succeeds.
#[derive(Debug, Clone)]
pub struct PushStamp {
    /// Info-hash of the pushed payload.
    pub torrent_hash: String,
    /// Accepting downloader id.
    pub downloader_id: Uuid,
    /// Accepting downloader display name.
    pub downloader_name: String,
    /// Task id assigned by the downloader.
    pub downloader_task_id: String,
    /// Push timestamp.
    pub push_time: DateTime<Utc>,
    /// Policy flag copied from the feed.
    pub pause_on_free_end: bool,
    /// Why the torrent was selected.
    pub download_source: DownloadSource,
    /// Rule that matched, when rule-selected.
    pub filter_rule_id: Option<Uuid>,
}

const UPSERT_SQL: &str = r"
    INSERT INTO torrent_infos (
        site_id, torrent_id, title, category, tag, size_bytes,
        free_level, free_end_time, torrent_hash, is_downloaded, is_pushed,
        push_time, downloader_id, downloader_name, downloader_task_id,
        progress, is_completed, completed_at, is_paused_by_system, paused_at,
        pause_reason, pause_on_free_end, is_skipped, last_check_time,
        retry_count, last_error, download_source, filter_rule_id,
        created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (site_id, torrent_id) DO UPDATE SET
        title = excluded.title,
        category = excluded.category,
        tag = excluded.tag,
        size_bytes = excluded.size_bytes,
        free_level = excluded.free_level,
        free_end_time = excluded.free_end_time,
        torrent_hash = excluded.torrent_hash,
        is_downloaded = excluded.is_downloaded,
        is_pushed = excluded.is_pushed,
        push_time = excluded.push_time,
        downloader_id = excluded.downloader_id,
        downloader_name = excluded.downloader_name,
        downloader_task_id = excluded.downloader_task_id,
        progress = excluded.progress,
        is_completed = excluded.is_completed,
        completed_at = excluded.completed_at,
        is_paused_by_system = excluded.is_paused_by_system,
        paused_at = excluded.paused_at,
        pause_reason = excluded.pause_reason,
        pause_on_free_end = excluded.pause_on_free_end,
        is_skipped = excluded.is_skipped,
        last_check_time = excluded.last_check_time,
        retry_count = excluded.retry_count,
        last_error = excluded.last_error,
        download_source = excluded.download_source,
        filter_rule_id = excluded.filter_rule_id,
        updated_at = excluded.updated_at
    RETURNING id
";

const SELECT_COLUMNS: &str = r"
    SELECT id, site_id, torrent_id, title, category, tag, size_bytes,
           free_level, free_end_time, torrent_hash, is_downloaded, is_pushed,
           push_time, downloader_id, downloader_name, downloader_task_id,
           progress, is_completed, completed_at, is_paused_by_system,
           paused_at, pause_reason, pause_on_free_end, is_skipped,
           last_check_time, retry_count, last_error, download_source,
           filter_rule_id, created_at, updated_at
    FROM torrent_infos
";

impl Store {
    /// Insert-or-update by `(site_id, torrent_id)`, preserving `created_at`.
    /// Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn upsert_torrent(&self, record: &TorrentRecord) -> Result<i64> {
        let row = sqlx::query(UPSERT_SQL)
            .bind(&record.site_id)
            .bind(&record.torrent_id)
            .bind(&record.title)
            .bind(record.category.as_deref())
            .bind(record.tag.as_deref())
            .bind(clamp_i64(record.size_bytes))
            .bind(record.free_level.as_str())
            .bind(record.free_end_time)
            .bind(record.torrent_hash.as_deref())
            .bind(record.is_downloaded)
            .bind(record.is_pushed)
            .bind(record.push_time)
            .bind(record.downloader_id.map(|id| id.to_string()))
            .bind(record.downloader_name.as_deref())
            .bind(record.downloader_task_id.as_deref())
            .bind(record.progress)
            .bind(record.is_completed)
            .bind(record.completed_at)
            .bind(record.is_paused_by_system)
            .bind(record.paused_at)
            .bind(record.pause_reason.as_deref())
            .bind(record.pause_on_free_end)
            .bind(record.is_skipped)
            .bind(record.last_check_time)
            .bind(i64::from(record.retry_count))
            .bind(record.last_error.as_deref())
            .bind(record.download_source.map(DownloadSource::as_str))
            .bind(record.filter_rule_id.map(|id| id.to_string()))
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DataError::db("torrent.upsert"))?;

        row.try_get("id").map_err(DataError::db("torrent.upsert"))
    }

    /// Look a record up by its natural key.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_torrent(
        &self,
        site_id: &str,
        torrent_id: &str,
    ) -> Result<Option<TorrentRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE site_id = ? AND torrent_id = ?");
        let row = sqlx::query(&sql)
            .bind(site_id)
            .bind(torrent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("torrent.get"))?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Look a record up by row id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_torrent_by_id(&self, id: i64) -> Result<Option<TorrentRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("torrent.get_by_id"))?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Look a record up by info-hash within a site. The hash index is not
    /// unique across sites; two sites may legitimately share an info-hash.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_torrent_by_hash(
        &self,
        site_id: &str,
        hash: &str,
    ) -> Result<Option<TorrentRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE site_id = ? AND torrent_hash = ?");
        let row = sqlx::query(&sql)
            .bind(site_id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("torrent.get_by_hash"))?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Page through records matching `filter`, newest first by default.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_torrents(
        &self,
        filter: &TorrentListFilter,
        page: u32,
        page_size: u32,
        sort: TorrentSort,
    ) -> Result<TorrentPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let now = Utc::now();

        let mut count_query =
            sqlx::QueryBuilder::new("SELECT COUNT(*) AS n FROM torrent_infos WHERE 1 = 1");
        push_filter(&mut count_query, filter, now);
        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(DataError::db("torrent.count"))?
            .try_get("n")
            .map_err(DataError::db("torrent.count"))?;

        let mut query = sqlx::QueryBuilder::new(format!("{SELECT_COLUMNS} WHERE 1 = 1"));
        push_filter(&mut query, filter, now);
        query.push(sort.order_clause());
        query.push(" LIMIT ");
        query.push_bind(i64::from(page_size));
        query.push(" OFFSET ");
        query.push_bind(i64::from((page - 1) * page_size));

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("torrent.list"))?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }

        Ok(TorrentPage {
            records,
            total: unclamp_u64(total),
            page,
            page_size,
        })
    }

    /// Mark a record rejected by the eligibility gate.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn mark_torrent_skipped(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_infos SET is_skipped = 1, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.mark_skipped"))?;
        Ok(())
    }

    /// Record that the `.torrent` payload was fetched and hashed.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn mark_torrent_downloaded(
        &self,
        id: i64,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_infos SET is_downloaded = 1, torrent_hash = ?, updated_at = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.mark_downloaded"))?;
        Ok(())
    }

    /// Record a successful push. The correlated columns move together inside
    /// one transaction so a crash cannot leave a half-stamped record.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn record_torrent_push(&self, id: i64, stamp: &PushStamp) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DataError::db("torrent.record_push"))?;

        sqlx::query(
            r"UPDATE torrent_infos SET
                torrent_hash = ?, is_pushed = 1, push_time = ?,
                downloader_id = ?, downloader_name = ?, downloader_task_id = ?,
                pause_on_free_end = ?, download_source = ?, filter_rule_id = ?,
                last_error = NULL, updated_at = ?
              WHERE id = ?",
        )
        .bind(&stamp.torrent_hash)
        .bind(stamp.push_time)
        .bind(stamp.downloader_id.to_string())
        .bind(&stamp.downloader_name)
        .bind(&stamp.downloader_task_id)
        .bind(stamp.pause_on_free_end)
        .bind(stamp.download_source.as_str())
        .bind(stamp.filter_rule_id.map(|id| id.to_string()))
        .bind(stamp.push_time)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(DataError::db("torrent.record_push"))?;

        tx.commit()
            .await
            .map_err(DataError::db("torrent.record_push"))?;
        debug!(record_id = id, downloader = %stamp.downloader_name, "push recorded");
        Ok(())
    }

    /// Record a failed push or fetch attempt. `permanent` forces the retry
    /// counter to `max_retry` so the scheduler stops trying.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn record_torrent_failure(
        &self,
        id: i64,
        error: &str,
        permanent: bool,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if permanent {
            sqlx::query(
                "UPDATE torrent_infos SET is_pushed = 0, retry_count = ?, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(i64::from(max_retry))
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::db("torrent.record_failure"))?;
        } else {
            sqlx::query(
                "UPDATE torrent_infos SET is_pushed = 0, retry_count = retry_count + 1, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::db("torrent.record_failure"))?;
        }
        Ok(())
    }

    /// Update the observed transfer progress.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn update_torrent_progress(
        &self,
        id: i64,
        progress: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_infos SET progress = ?, last_check_time = ?, updated_at = ? WHERE id = ?",
        )
        .bind(progress)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.update_progress"))?;
        Ok(())
    }

    /// Mark the transfer complete. Clears any system pause so the two
    /// terminal flags can never coexist.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn mark_torrent_completed(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"UPDATE torrent_infos SET
                is_completed = 1, completed_at = ?, progress = 100,
                is_paused_by_system = 0, paused_at = NULL,
                last_check_time = ?, updated_at = ?
              WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.mark_completed"))?;
        Ok(())
    }

    /// Record that the lifecycle controller paused the task.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn mark_torrent_system_paused(
        &self,
        id: i64,
        reason: &str,
        progress: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"UPDATE torrent_infos SET
                is_paused_by_system = 1, paused_at = ?, pause_reason = ?,
                progress = ?, last_check_time = ?, updated_at = ?
              WHERE id = ?",
        )
        .bind(now)
        .bind(reason)
        .bind(progress)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.mark_system_paused"))?;
        Ok(())
    }

    /// Record that the lifecycle controller deleted the task from the
    /// downloader. The pause flag stays clear; only the reason is kept.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn mark_torrent_auto_deleted(
        &self,
        id: i64,
        reason: &str,
        progress: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"UPDATE torrent_infos SET
                is_paused_by_system = 0, paused_at = NULL, pause_reason = ?,
                progress = ?, last_check_time = ?, updated_at = ?
              WHERE id = ?",
        )
        .bind(reason)
        .bind(progress)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.mark_auto_deleted"))?;
        Ok(())
    }

    /// Clear the system-pause flag after a manual resume.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn clear_torrent_system_pause(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"UPDATE torrent_infos SET
                is_paused_by_system = 0, paused_at = NULL, pause_reason = NULL,
                updated_at = ?
              WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("torrent.clear_system_pause"))?;
        Ok(())
    }

    /// Records the lifecycle controller should hold timers for: pushed, with
    /// the pause policy set, a known promotion end, and not yet terminal.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn lifecycle_candidates(&self) -> Result<Vec<TorrentRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE is_pushed = 1 AND pause_on_free_end = 1 \
             AND free_end_time IS NOT NULL AND is_completed = 0 \
             AND is_paused_by_system = 0 AND pause_reason IS NULL"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("torrent.lifecycle_candidates"))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Move terminal records older than `retention` into the archive table,
    /// stamping `archived_at`. Returns the number of archived rows.
    ///
    /// A record is terminal when it was pushed and its free window (plus a
    /// one-hour grace) has passed or never existed, or when it was never
    /// pushed and its retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn archive_torrents(
        &self,
        retention: Duration,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let cutoff = now - retention;
        let grace = now - Duration::hours(1);

        let terminal = r"created_at < ? AND (
                (is_pushed = 1 AND (free_end_time IS NULL OR free_end_time < ?))
                OR (is_pushed = 0 AND retry_count >= ?)
            )";

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DataError::db("torrent.archive"))?;

        let insert = format!(
            r"INSERT INTO torrent_info_archives (
                id, site_id, torrent_id, title, category, tag, size_bytes,
                free_level, free_end_time, torrent_hash, is_downloaded,
                is_pushed, push_time, downloader_id, downloader_name,
                downloader_task_id, progress, is_completed, completed_at,
                is_paused_by_system, paused_at, pause_reason,
                pause_on_free_end, is_skipped, last_check_time, retry_count,
                last_error, download_source, filter_rule_id, created_at,
                updated_at, archived_at
            )
            SELECT id, site_id, torrent_id, title, category, tag, size_bytes,
                   free_level, free_end_time, torrent_hash, is_downloaded,
                   is_pushed, push_time, downloader_id, downloader_name,
                   downloader_task_id, progress, is_completed, completed_at,
                   is_paused_by_system, paused_at, pause_reason,
                   pause_on_free_end, is_skipped, last_check_time, retry_count,
                   last_error, download_source, filter_rule_id, created_at,
                   updated_at, ?
            FROM torrent_infos WHERE {terminal}"
        );
        let archived = sqlx::query(&insert)
            .bind(now)
            .bind(cutoff)
            .bind(grace)
            .bind(i64::from(max_retry))
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("torrent.archive"))?
            .rows_affected();

        let delete = format!("DELETE FROM torrent_infos WHERE {terminal}");
        sqlx::query(&delete)
            .bind(cutoff)
            .bind(grace)
            .bind(i64::from(max_retry))
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("torrent.archive"))?;

        tx.commit()
            .await
            .map_err(DataError::db("torrent.archive"))?;
        Ok(archived)
    }
}

fn push_filter(
    query: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>,
    filter: &TorrentListFilter,
    now: DateTime<Utc>,
) {
    if let Some(downloaded) = filter.downloaded {
        query.push(" AND is_downloaded = ");
        query.push_bind(downloaded);
    }
    if let Some(pushed) = filter.pushed {
        query.push(" AND is_pushed = ");
        query.push_bind(pushed);
    }
    if let Some(expired) = filter.expired {
        if expired {
            query.push(" AND free_end_time IS NOT NULL AND free_end_time < ");
            query.push_bind(now);
        } else {
            query.push(" AND (free_end_time IS NULL OR free_end_time >= ");
            query.push_bind(now);
            query.push(")");
        }
    }
    if let Some(site_id) = &filter.site_id {
        query.push(" AND site_id = ");
        query.push_bind(site_id.clone());
    }
    if let Some(keyword) = &filter.keyword {
        let pattern = format!("%{keyword}%");
        query.push(" AND (title LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR tag LIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
}

fn parse_uuid_opt(column: &'static str, value: Option<String>) -> Result<Option<Uuid>> {
    value
        .map(|raw| {
            Uuid::parse_str(&raw).map_err(|_| DataError::Corrupt { column, value: raw })
        })
        .transpose()
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<TorrentRecord> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "torrent.decode",
            source,
        }
    }

    let free_level: String = row.try_get("free_level").map_err(dec)?;
    let download_source: Option<String> = row.try_get("download_source").map_err(dec)?;
    let downloader_id: Option<String> = row.try_get("downloader_id").map_err(dec)?;
    let filter_rule_id: Option<String> = row.try_get("filter_rule_id").map_err(dec)?;

    Ok(TorrentRecord {
        id: row.try_get("id").map_err(dec)?,
        site_id: row.try_get("site_id").map_err(dec)?,
        torrent_id: row.try_get("torrent_id").map_err(dec)?,
        title: row.try_get("title").map_err(dec)?,
        category: row.try_get("category").map_err(dec)?,
        tag: row.try_get("tag").map_err(dec)?,
        size_bytes: unclamp_u64(row.try_get("size_bytes").map_err(dec)?),
        free_level: DiscountLevel::parse(&free_level),
        free_end_time: row.try_get("free_end_time").map_err(dec)?,
        torrent_hash: row.try_get("torrent_hash").map_err(dec)?,
        is_downloaded: row.try_get("is_downloaded").map_err(dec)?,
        is_pushed: row.try_get("is_pushed").map_err(dec)?,
        push_time: row.try_get("push_time").map_err(dec)?,
        downloader_id: parse_uuid_opt("downloader_id", downloader_id)?,
        downloader_name: row.try_get("downloader_name").map_err(dec)?,
        downloader_task_id: row.try_get("downloader_task_id").map_err(dec)?,
        progress: row.try_get("progress").map_err(dec)?,
        is_completed: row.try_get("is_completed").map_err(dec)?,
        completed_at: row.try_get("completed_at").map_err(dec)?,
        is_paused_by_system: row.try_get("is_paused_by_system").map_err(dec)?,
        paused_at: row.try_get("paused_at").map_err(dec)?,
        pause_reason: row.try_get("pause_reason").map_err(dec)?,
        pause_on_free_end: row.try_get("pause_on_free_end").map_err(dec)?,
        is_skipped: row.try_get("is_skipped").map_err(dec)?,
        last_check_time: row.try_get("last_check_time").map_err(dec)?,
        retry_count: u32::try_from(row.try_get::<i64, _>("retry_count").map_err(dec)?)
            .unwrap_or(u32::MAX),
        last_error: row.try_get("last_error").map_err(dec)?,
        download_source: download_source.as_deref().and_then(DownloadSource::parse),
        filter_rule_id: parse_uuid_opt("filter_rule_id", filter_rule_id)?,
        created_at: row.try_get("created_at").map_err(dec)?,
        updated_at: row.try_get("updated_at").map_err(dec)?,
    })
}
