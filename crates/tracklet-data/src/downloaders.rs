//! Downloader settings and directory persistence.
//!
//! Invariants enforced here: at most one default downloader, at most one
//! default directory per downloader, and the default downloader cannot be
//! deleted while others remain.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracklet_core::{DownloaderDirectory, DownloaderKind, DownloaderSetting};
use uuid::Uuid;

use crate::Store;
use crate::error::{DataError, Result};

const SETTING_COLUMNS: &str = r"
    SELECT id, name, kind, url, username, password, is_default, enabled,
           auto_start, created_at, updated_at
    FROM downloader_settings
";

impl Store {
    /// Insert or update a downloader. When the row claims the default slot,
    /// every other row loses it inside the same transaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails, including a
    /// [`DataError::Constraint`] on a duplicate name.
    pub async fn upsert_downloader(&self, setting: &DownloaderSetting) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DataError::db("downloader.upsert"))?;

        if setting.is_default {
            sqlx::query("UPDATE downloader_settings SET is_default = 0 WHERE id != ?")
                .bind(setting.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(DataError::db("downloader.upsert"))?;
        }

        sqlx::query(
            r"INSERT INTO downloader_settings (
                id, name, kind, url, username, password, is_default, enabled,
                auto_start, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                url = excluded.url,
                username = excluded.username,
                password = excluded.password,
                is_default = excluded.is_default,
                enabled = excluded.enabled,
                auto_start = excluded.auto_start,
                updated_at = excluded.updated_at",
        )
        .bind(setting.id.to_string())
        .bind(&setting.name)
        .bind(setting.kind.as_str())
        .bind(&setting.url)
        .bind(setting.username.as_deref())
        .bind(setting.password.as_deref())
        .bind(setting.is_default)
        .bind(setting.enabled)
        .bind(setting.auto_start)
        .bind(setting.created_at)
        .bind(setting.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DataError::db("downloader.upsert"))?;

        tx.commit()
            .await
            .map_err(DataError::db("downloader.upsert"))?;
        Ok(())
    }

    /// Delete a downloader. Deleting the default is rejected while other
    /// downloaders exist.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Constraint`] for a protected default and
    /// [`DataError::NotFound`] for an unknown id.
    pub async fn delete_downloader(&self, id: Uuid) -> Result<()> {
        let setting = self
            .get_downloader(id)
            .await?
            .ok_or_else(|| DataError::NotFound {
                entity: "downloader",
                key: id.to_string(),
            })?;

        if setting.is_default {
            let others: i64 =
                sqlx::query("SELECT COUNT(*) AS n FROM downloader_settings WHERE id != ?")
                    .bind(id.to_string())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(DataError::db("downloader.delete"))?
                    .try_get("n")
                    .map_err(DataError::db("downloader.delete"))?;
            if others > 0 {
                return Err(DataError::Constraint {
                    message: "cannot delete the default downloader while others exist".to_string(),
                });
            }
        }

        sqlx::query("DELETE FROM downloader_settings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DataError::db("downloader.delete"))?;
        Ok(())
    }

    /// Fetch one downloader by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_downloader(&self, id: Uuid) -> Result<Option<DownloaderSetting>> {
        let sql = format!("{SETTING_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("downloader.get"))?;
        row.map(|r| setting_from_row(&r)).transpose()
    }

    /// List downloaders, default first.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_downloaders(&self, only_enabled: bool) -> Result<Vec<DownloaderSetting>> {
        let sql = if only_enabled {
            format!("{SETTING_COLUMNS} WHERE enabled = 1 ORDER BY is_default DESC, name")
        } else {
            format!("{SETTING_COLUMNS} ORDER BY is_default DESC, name")
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("downloader.list"))?;
        rows.iter().map(setting_from_row).collect()
    }

    /// The downloader marked as default, when one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn default_downloader(&self) -> Result<Option<DownloaderSetting>> {
        let sql = format!("{SETTING_COLUMNS} WHERE is_default = 1 AND enabled = 1");
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("downloader.default"))?;
        row.map(|r| setting_from_row(&r)).transpose()
    }

    /// Replace the directory presets of a downloader.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Constraint`] when more than one directory claims
    /// the default slot.
    pub async fn replace_directories(
        &self,
        downloader_id: Uuid,
        directories: &[DownloaderDirectory],
    ) -> Result<()> {
        let defaults = directories.iter().filter(|d| d.is_default).count();
        if defaults > 1 {
            return Err(DataError::Constraint {
                message: "at most one default directory per downloader".to_string(),
            });
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DataError::db("downloader.directories"))?;

        sqlx::query("DELETE FROM downloader_directories WHERE downloader_id = ?")
            .bind(downloader_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("downloader.directories"))?;

        for directory in directories {
            sqlx::query(
                r"INSERT INTO downloader_directories (id, downloader_id, path, alias, is_default)
                  VALUES (?, ?, ?, ?, ?)",
            )
            .bind(directory.id.to_string())
            .bind(downloader_id.to_string())
            .bind(&directory.path)
            .bind(directory.alias.as_deref())
            .bind(directory.is_default)
            .execute(&mut *tx)
            .await
            .map_err(DataError::db("downloader.directories"))?;
        }

        tx.commit()
            .await
            .map_err(DataError::db("downloader.directories"))?;
        Ok(())
    }

    /// List the directory presets of a downloader, default first.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_directories(&self, downloader_id: Uuid) -> Result<Vec<DownloaderDirectory>> {
        let rows = sqlx::query(
            r"SELECT id, downloader_id, path, alias, is_default
              FROM downloader_directories WHERE downloader_id = ?
              ORDER BY is_default DESC, path",
        )
        .bind(downloader_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::db("downloader.list_directories"))?;
        rows.iter().map(directory_from_row).collect()
    }

    /// The default directory preset of a downloader, when one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn default_directory(
        &self,
        downloader_id: Uuid,
    ) -> Result<Option<DownloaderDirectory>> {
        let row = sqlx::query(
            r"SELECT id, downloader_id, path, alias, is_default
              FROM downloader_directories
              WHERE downloader_id = ? AND is_default = 1",
        )
        .bind(downloader_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::db("downloader.default_directory"))?;
        row.map(|r| directory_from_row(&r)).transpose()
    }
}

fn setting_from_row(row: &SqliteRow) -> Result<DownloaderSetting> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "downloader.decode",
            source,
        }
    }

    let id: String = row.try_get("id").map_err(dec)?;
    let kind: String = row.try_get("kind").map_err(dec)?;
    Ok(DownloaderSetting {
        id: Uuid::parse_str(&id).map_err(|_| DataError::Corrupt {
            column: "id",
            value: id,
        })?,
        name: row.try_get("name").map_err(dec)?,
        kind: DownloaderKind::parse(&kind).ok_or(DataError::Corrupt {
            column: "kind",
            value: kind.clone(),
        })?,
        url: row.try_get("url").map_err(dec)?,
        username: row.try_get("username").map_err(dec)?,
        password: row.try_get("password").map_err(dec)?,
        is_default: row.try_get("is_default").map_err(dec)?,
        enabled: row.try_get("enabled").map_err(dec)?,
        auto_start: row.try_get("auto_start").map_err(dec)?,
        created_at: row.try_get("created_at").map_err(dec)?,
        updated_at: row.try_get("updated_at").map_err(dec)?,
    })
}

fn directory_from_row(row: &SqliteRow) -> Result<DownloaderDirectory> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "directory.decode",
            source,
        }
    }

    let id: String = row.try_get("id").map_err(dec)?;
    let downloader_id: String = row.try_get("downloader_id").map_err(dec)?;
    Ok(DownloaderDirectory {
        id: Uuid::parse_str(&id).map_err(|_| DataError::Corrupt {
            column: "id",
            value: id,
        })?,
        downloader_id: Uuid::parse_str(&downloader_id).map_err(|_| DataError::Corrupt {
            column: "downloader_id",
            value: downloader_id,
        })?,
        path: row.try_get("path").map_err(dec)?,
        alias: row.try_get("alias").map_err(dec)?,
        is_default: row.try_get("is_default").map_err(dec)?,
    })
}
