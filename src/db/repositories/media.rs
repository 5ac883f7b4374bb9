//! Media repository
//!
//! Album images and videos, media likes, the per-owner size sum used for
//! quota, and short-lived temporary uploads.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{MediaItem, MediaKind, MediaPatch, NewMedia, TempMedia};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn add(&self, album_id: i64, media: &NewMedia) -> Result<MediaItem>;

    async fn get(&self, id: i64) -> Result<Option<MediaItem>>;

    /// All media of an album in insertion order
    async fn list_by_album(&self, album_id: i64) -> Result<Vec<MediaItem>>;

    async fn update(&self, id: i64, patch: &MediaPatch) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Total size in MB of every media item in every album the user owns
    async fn sum_sizes_by_owner(&self, user_id: i64) -> Result<f64>;

    /// Add or remove the viewer's like; returns (liked, like_count)
    async fn toggle_like(&self, media_id: i64, user_id: i64) -> Result<(bool, i64)>;

    /// Ids of media in `album_id` the user has liked
    async fn liked_ids(&self, album_id: i64, user_id: i64) -> Result<HashSet<i64>>;

    async fn add_temp(&self, temp: &TempMedia) -> Result<TempMedia>;

    async fn expired_temp(&self, now: DateTime<Utc>) -> Result<Vec<TempMedia>>;

    async fn delete_temp(&self, id: i64) -> Result<()>;
}

pub struct SqlxMediaRepository {
    pool: DynDatabasePool,
}

impl SqlxMediaRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn MediaRepository> {
        Arc::new(Self::new(pool))
    }
}

const MEDIA_COLUMNS: &str = "id, album_id, kind, url, thumbnail_url, description, size_mb, \
    mime_type, like_count, created_at, updated_at";
const TEMP_COLUMNS: &str = "id, url, ip_address, mime_type, size_mb, expires_at, created_at";

const INSERT_MEDIA: &str = r#"
    INSERT INTO album_media (album_id, kind, url, thumbnail_url, description, size_mb, mime_type, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;
const INSERT_TEMP: &str = r#"
    INSERT INTO temp_media (url, ip_address, mime_type, size_mb, expires_at, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;
const UPDATE_MEDIA: &str = r#"
    UPDATE album_media SET
        description = COALESCE(?, description),
        url = COALESCE(?, url),
        size_mb = COALESCE(?, size_mb),
        mime_type = COALESCE(?, mime_type),
        updated_at = ?
    WHERE id = ?
"#;
const SUM_BY_OWNER: &str = r#"
    SELECT COALESCE(SUM(m.size_mb), 0.0) AS total
    FROM album_media m
    JOIN albums a ON a.id = m.album_id
    WHERE a.user_id = ?
"#;
const LIKED_IDS: &str = r#"
    SELECT l.media_id FROM media_likes l
    JOIN album_media m ON m.id = l.media_id
    WHERE m.album_id = ? AND l.user_id = ?
"#;

#[async_trait]
impl MediaRepository for SqlxMediaRepository {
    async fn add(&self, album_id: i64, media: &NewMedia) -> Result<MediaItem> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_MEDIA)
                .bind(album_id)
                .bind(media.kind.to_string())
                .bind(&media.url)
                .bind(&media.thumbnail_url)
                .bind(&media.description)
                .bind(media.size_mb)
                .bind(&media.mime_type)
                .bind(now)
                .bind(now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to add media")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_MEDIA)
                .bind(album_id)
                .bind(media.kind.to_string())
                .bind(&media.url)
                .bind(&media.thumbnail_url)
                .bind(&media.description)
                .bind(media.size_mb)
                .bind(&media.mime_type)
                .bind(now)
                .bind(now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to add media")?
                .last_insert_id() as i64,
        };
        Ok(MediaItem {
            id,
            album_id,
            kind: media.kind,
            url: media.url.clone(),
            thumbnail_url: media.thumbnail_url.clone(),
            description: media.description.clone(),
            size_mb: media.size_mb,
            mime_type: media.mime_type.clone(),
            like_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<MediaItem>> {
        let sql = format!("SELECT {} FROM album_media WHERE id = ?", MEDIA_COLUMNS);
        let item = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get media")?
                .as_ref()
                .map(row_to_media_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get media")?
                .as_ref()
                .map(row_to_media_mysql),
        };
        Ok(item)
    }

    async fn list_by_album(&self, album_id: i64) -> Result<Vec<MediaItem>> {
        let sql = format!("SELECT {} FROM album_media WHERE album_id = ? ORDER BY id", MEDIA_COLUMNS);
        let items = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(album_id)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list album media")?
                .iter()
                .map(row_to_media_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(album_id)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list album media")?
                .iter()
                .map(row_to_media_mysql)
                .collect(),
        };
        Ok(items)
    }

    async fn update(&self, id: i64, patch: &MediaPatch) -> Result<()> {
        let (url, size, mime) = match &patch.object {
            Some((url, size, mime)) => (Some(url.clone()), Some(*size), Some(mime.clone())),
            None => (None, None, None),
        };
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(UPDATE_MEDIA)
                    .bind(&patch.description)
                    .bind(url)
                    .bind(size)
                    .bind(mime)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update media")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(UPDATE_MEDIA)
                    .bind(&patch.description)
                    .bind(url)
                    .bind(size)
                    .bind(mime)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update media")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM album_media WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to delete media")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to delete media")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn sum_sizes_by_owner(&self, user_id: i64) -> Result<f64> {
        let total: f64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(SUM_BY_OWNER)
                .bind(user_id)
                .fetch_one(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to sum media sizes")?
                .get("total"),
            DatabaseDriver::Mysql => sqlx::query(SUM_BY_OWNER)
                .bind(user_id)
                .fetch_one(mysql_pool(&self.pool)?)
                .await
                .context("Failed to sum media sizes")?
                .get("total"),
        };
        Ok(total)
    }

    async fn toggle_like(&self, media_id: i64, user_id: i64) -> Result<(bool, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => toggle_like_sqlite(sqlite_pool(&self.pool)?, media_id, user_id).await,
            DatabaseDriver::Mysql => toggle_like_mysql(mysql_pool(&self.pool)?, media_id, user_id).await,
        }
    }

    async fn liked_ids(&self, album_id: i64, user_id: i64) -> Result<HashSet<i64>> {
        let ids = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(LIKED_IDS)
                .bind(album_id)
                .bind(user_id)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list liked media")?
                .iter()
                .map(|r| r.get("media_id"))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(LIKED_IDS)
                .bind(album_id)
                .bind(user_id)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list liked media")?
                .iter()
                .map(|r| r.get("media_id"))
                .collect(),
        };
        Ok(ids)
    }

    async fn add_temp(&self, temp: &TempMedia) -> Result<TempMedia> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_TEMP)
                .bind(&temp.url)
                .bind(&temp.ip_address)
                .bind(&temp.mime_type)
                .bind(temp.size_mb)
                .bind(temp.expires_at)
                .bind(temp.created_at)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to record temp media")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_TEMP)
                .bind(&temp.url)
                .bind(&temp.ip_address)
                .bind(&temp.mime_type)
                .bind(temp.size_mb)
                .bind(temp.expires_at)
                .bind(temp.created_at)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to record temp media")?
                .last_insert_id() as i64,
        };
        Ok(TempMedia { id, ..temp.clone() })
    }

    async fn expired_temp(&self, now: DateTime<Utc>) -> Result<Vec<TempMedia>> {
        let sql = format!("SELECT {} FROM temp_media WHERE expires_at <= ? ORDER BY id", TEMP_COLUMNS);
        let items = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(now)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list expired temp media")?
                .iter()
                .map(|row| TempMedia {
                    id: row.get("id"),
                    url: row.get("url"),
                    ip_address: row.get("ip_address"),
                    mime_type: row.get("mime_type"),
                    size_mb: row.get("size_mb"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                })
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(now)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list expired temp media")?
                .iter()
                .map(|row| TempMedia {
                    id: row.get("id"),
                    url: row.get("url"),
                    ip_address: row.get("ip_address"),
                    mime_type: row.get("mime_type"),
                    size_mb: row.get("size_mb"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                })
                .collect(),
        };
        Ok(items)
    }

    async fn delete_temp(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM temp_media WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to delete temp media")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to delete temp media")?;
            }
        }
        Ok(())
    }
}

fn parse_kind(raw: String) -> MediaKind {
    MediaKind::from_str(&raw).unwrap_or(MediaKind::Image)
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn toggle_like_sqlite(pool: &SqlitePool, media_id: i64, user_id: i64) -> Result<(bool, i64)> {
    let removed = sqlx::query("DELETE FROM media_likes WHERE media_id = ? AND user_id = ?")
        .bind(media_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to remove media like")?;

    let liked = if removed.rows_affected() > 0 {
        sqlx::query("UPDATE album_media SET like_count = MAX(0, like_count - 1) WHERE id = ?")
            .bind(media_id)
            .execute(pool)
            .await?;
        false
    } else {
        let added = sqlx::query("INSERT OR IGNORE INTO media_likes (media_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(media_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(pool)
            .await
            .context("Failed to add media like")?;
        if added.rows_affected() > 0 {
            sqlx::query("UPDATE album_media SET like_count = like_count + 1 WHERE id = ?")
                .bind(media_id)
                .execute(pool)
                .await?;
        }
        true
    };

    let count: i64 = sqlx::query("SELECT like_count FROM album_media WHERE id = ?")
        .bind(media_id)
        .fetch_one(pool)
        .await
        .context("Failed to read media like count")?
        .get("like_count");
    Ok((liked, count))
}

fn row_to_media_sqlite(row: &SqliteRow) -> MediaItem {
    MediaItem {
        id: row.get("id"),
        album_id: row.get("album_id"),
        kind: parse_kind(row.get("kind")),
        url: row.get("url"),
        thumbnail_url: row.get("thumbnail_url"),
        description: row.get("description"),
        size_mb: row.get("size_mb"),
        mime_type: row.get("mime_type"),
        like_count: row.get("like_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn toggle_like_mysql(pool: &MySqlPool, media_id: i64, user_id: i64) -> Result<(bool, i64)> {
    let removed = sqlx::query("DELETE FROM media_likes WHERE media_id = ? AND user_id = ?")
        .bind(media_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to remove media like")?;

    let liked = if removed.rows_affected() > 0 {
        sqlx::query("UPDATE album_media SET like_count = GREATEST(0, like_count - 1) WHERE id = ?")
            .bind(media_id)
            .execute(pool)
            .await?;
        false
    } else {
        let added = sqlx::query("INSERT IGNORE INTO media_likes (media_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(media_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(pool)
            .await
            .context("Failed to add media like")?;
        if added.rows_affected() > 0 {
            sqlx::query("UPDATE album_media SET like_count = like_count + 1 WHERE id = ?")
                .bind(media_id)
                .execute(pool)
                .await?;
        }
        true
    };

    let count: i64 = sqlx::query("SELECT like_count FROM album_media WHERE id = ?")
        .bind(media_id)
        .fetch_one(pool)
        .await
        .context("Failed to read media like count")?
        .get("like_count");
    Ok((liked, count))
}

fn row_to_media_mysql(row: &MySqlRow) -> MediaItem {
    MediaItem {
        id: row.get("id"),
        album_id: row.get("album_id"),
        kind: parse_kind(row.get("kind")),
        url: row.get("url"),
        thumbnail_url: row.get("thumbnail_url"),
        description: row.get("description"),
        size_mb: row.get("size_mb"),
        mime_type: row.get("mime_type"),
        like_count: row.get("like_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
