//! Album repository
//!
//! Albums, their tags and album likes. Listing returns the full candidate set
//! in the requested order; visibility filtering and pagination happen in the
//! service layer so a page is never under-filled by excluded albums.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{Album, AlbumQuery, AlbumSort, CreateAlbumInput, PrivacyMode, UpdateAlbumInput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait AlbumRepository: Send + Sync {
    async fn create(&self, input: &CreateAlbumInput) -> Result<Album>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Album>>;

    /// Candidate albums for a listing, sorted, unpaginated
    async fn find(&self, query: &AlbumQuery) -> Result<Vec<Album>>;

    /// Non-private albums of the given owners, most recently updated first
    async fn find_by_owners(&self, owner_ids: &[i64]) -> Result<Vec<Album>>;

    /// The owner's most recently created albums
    async fn latest_by_owner(&self, owner_id: i64, limit: i64) -> Result<Vec<Album>>;

    async fn update(&self, id: i64, input: &UpdateAlbumInput) -> Result<Album>;

    async fn set_cover(&self, id: i64, cover_url: Option<&str>) -> Result<()>;

    /// Bump `updated_at` to now
    async fn touch(&self, id: i64) -> Result<()>;

    async fn increment_view_count(&self, id: i64) -> Result<()>;

    /// Remove the album; media, likes, comments and tag links cascade
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Albums whose last update is older than `cutoff`
    async fn stale_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Album>>;

    /// Attach tags by name, creating missing ones
    async fn add_tags(&self, album_id: i64, names: &[String]) -> Result<()>;

    async fn tags_for(&self, album_id: i64) -> Result<Vec<String>>;

    /// Add or remove the viewer's like; returns (liked, like_count)
    async fn toggle_like(&self, album_id: i64, user_id: i64) -> Result<(bool, i64)>;
}

pub struct SqlxAlbumRepository {
    pool: DynDatabasePool,
}

impl SqlxAlbumRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AlbumRepository> {
        Arc::new(Self::new(pool))
    }
}

const ALBUM_COLUMNS: &str = "id, user_id, title, description, cover_url, privacy, target_emails, \
    like_count, view_count, created_at, updated_at";

fn order_clause(sort: AlbumSort) -> &'static str {
    match sort {
        AlbumSort::Recent => "ORDER BY updated_at DESC, id DESC",
        AlbumSort::Oldest => "ORDER BY created_at ASC, id ASC",
        AlbumSort::Popular => "ORDER BY like_count DESC, id DESC",
    }
}

/// SQL for `find`; binds are owner_id? then search pattern?
fn find_sql(query: &AlbumQuery) -> String {
    let mut conditions = Vec::new();
    if query.owner_id.is_some() {
        conditions.push("user_id = ?");
    }
    if !query.include_private {
        conditions.push("privacy <> 'private'");
    }
    if query.search.is_some() {
        conditions.push("LOWER(title) LIKE ?");
    }
    let mut sql = format!("SELECT {} FROM albums", ALBUM_COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push(' ');
    sql.push_str(order_clause(query.sort));
    sql
}

fn by_owners_sql(count: usize) -> String {
    let placeholders = vec!["?"; count].join(", ");
    format!(
        "SELECT {} FROM albums WHERE user_id IN ({}) AND privacy <> 'private' ORDER BY updated_at DESC, id DESC",
        ALBUM_COLUMNS, placeholders
    )
}

const UPDATE_ALBUM: &str = r#"
    UPDATE albums SET
        title = COALESCE(?, title),
        description = COALESCE(?, description),
        privacy = COALESCE(?, privacy),
        target_emails = CASE WHEN ? THEN ? ELSE target_emails END,
        updated_at = ?
    WHERE id = ?
"#;

const LIKE_COUNT: &str = "SELECT like_count FROM albums WHERE id = ?";

#[async_trait]
impl AlbumRepository for SqlxAlbumRepository {
    async fn create(&self, input: &CreateAlbumInput) -> Result<Album> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_album_sqlite(sqlite_pool(&self.pool)?, input).await?,
            DatabaseDriver::Mysql => create_album_mysql(mysql_pool(&self.pool)?, input).await?,
        };
        self.get_by_id(id).await?.context("Created album not found")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Album>> {
        let sql = format!("SELECT {} FROM albums WHERE id = ?", ALBUM_COLUMNS);
        let album = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get album")?
                .as_ref()
                .map(row_to_album_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get album")?
                .as_ref()
                .map(row_to_album_mysql),
        };
        Ok(album)
    }

    async fn find(&self, query: &AlbumQuery) -> Result<Vec<Album>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => find_albums_sqlite(sqlite_pool(&self.pool)?, query).await,
            DatabaseDriver::Mysql => find_albums_mysql(mysql_pool(&self.pool)?, query).await,
        }
    }

    async fn find_by_owners(&self, owner_ids: &[i64]) -> Result<Vec<Album>> {
        if owner_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = by_owners_sql(owner_ids.len());
        let albums = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                for id in owner_ids {
                    query = query.bind(*id);
                }
                query
                    .fetch_all(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to list followed albums")?
                    .iter()
                    .map(row_to_album_sqlite)
                    .collect()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                for id in owner_ids {
                    query = query.bind(*id);
                }
                query
                    .fetch_all(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to list followed albums")?
                    .iter()
                    .map(row_to_album_mysql)
                    .collect()
            }
        };
        Ok(albums)
    }

    async fn latest_by_owner(&self, owner_id: i64, limit: i64) -> Result<Vec<Album>> {
        let sql = format!(
            "SELECT {} FROM albums WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            ALBUM_COLUMNS
        );
        let albums = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(owner_id)
                .bind(limit)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list latest albums")?
                .iter()
                .map(row_to_album_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(owner_id)
                .bind(limit)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list latest albums")?
                .iter()
                .map(row_to_album_mysql)
                .collect(),
        };
        Ok(albums)
    }

    async fn update(&self, id: i64, input: &UpdateAlbumInput) -> Result<Album> {
        let privacy = input.privacy.as_ref().map(|p| p.as_str().to_string());
        let replace_targets = input.target_emails.is_some();
        let targets = input.target_emails.clone().flatten();
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(UPDATE_ALBUM)
                    .bind(&input.title)
                    .bind(&input.description)
                    .bind(privacy)
                    .bind(replace_targets)
                    .bind(targets)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update album")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(UPDATE_ALBUM)
                    .bind(&input.title)
                    .bind(&input.description)
                    .bind(privacy)
                    .bind(replace_targets)
                    .bind(targets)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update album")?;
            }
        }
        self.get_by_id(id).await?.context("Album not found after update")
    }

    async fn set_cover(&self, id: i64, cover_url: Option<&str>) -> Result<()> {
        let sql = "UPDATE albums SET cover_url = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(cover_url)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to set album cover")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(cover_url)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to set album cover")?;
            }
        }
        Ok(())
    }

    async fn touch(&self, id: i64) -> Result<()> {
        let sql = "UPDATE albums SET updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to touch album")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to touch album")?;
            }
        }
        Ok(())
    }

    async fn increment_view_count(&self, id: i64) -> Result<()> {
        let sql = "UPDATE albums SET view_count = view_count + 1 WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to increment view count")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to increment view count")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM albums WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to delete album")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to delete album")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn stale_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Album>> {
        let sql = format!("SELECT {} FROM albums WHERE updated_at < ? ORDER BY id", ALBUM_COLUMNS);
        let albums = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(cutoff)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list stale albums")?
                .iter()
                .map(row_to_album_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(cutoff)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list stale albums")?
                .iter()
                .map(row_to_album_mysql)
                .collect(),
        };
        Ok(albums)
    }

    async fn add_tags(&self, album_id: i64, names: &[String]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => add_tags_sqlite(sqlite_pool(&self.pool)?, album_id, names).await,
            DatabaseDriver::Mysql => add_tags_mysql(mysql_pool(&self.pool)?, album_id, names).await,
        }
    }

    async fn tags_for(&self, album_id: i64) -> Result<Vec<String>> {
        let sql = "SELECT t.name FROM tags t JOIN album_tags l ON l.tag_id = t.id WHERE l.album_id = ? ORDER BY t.name";
        let tags = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(album_id)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get album tags")?
                .iter()
                .map(|r| r.get("name"))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(album_id)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get album tags")?
                .iter()
                .map(|r| r.get("name"))
                .collect(),
        };
        Ok(tags)
    }

    async fn toggle_like(&self, album_id: i64, user_id: i64) -> Result<(bool, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => toggle_like_sqlite(sqlite_pool(&self.pool)?, album_id, user_id).await,
            DatabaseDriver::Mysql => toggle_like_mysql(mysql_pool(&self.pool)?, album_id, user_id).await,
        }
    }
}

fn normalized_tags(names: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_album_sqlite(pool: &SqlitePool, input: &CreateAlbumInput) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO albums (user_id, title, description, privacy, target_emails, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.user_id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(input.privacy.as_str())
    .bind(&input.target_emails)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create album")?;
    Ok(result.last_insert_rowid())
}

async fn find_albums_sqlite(pool: &SqlitePool, query: &AlbumQuery) -> Result<Vec<Album>> {
    let sql = find_sql(query);
    let mut q = sqlx::query(&sql);
    if let Some(owner) = query.owner_id {
        q = q.bind(owner);
    }
    if let Some(search) = &query.search {
        q = q.bind(format!("%{}%", search.trim().to_lowercase()));
    }
    let rows = q.fetch_all(pool).await.context("Failed to list albums")?;
    Ok(rows.iter().map(row_to_album_sqlite).collect())
}

async fn add_tags_sqlite(pool: &SqlitePool, album_id: i64, names: &[String]) -> Result<()> {
    for name in normalized_tags(names) {
        sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
            .bind(&name)
            .execute(pool)
            .await
            .context("Failed to create tag")?;
        sqlx::query(
            "INSERT OR IGNORE INTO album_tags (album_id, tag_id) SELECT ?, id FROM tags WHERE name = ?",
        )
        .bind(album_id)
        .bind(&name)
        .execute(pool)
        .await
        .context("Failed to link tag")?;
    }
    Ok(())
}

async fn toggle_like_sqlite(pool: &SqlitePool, album_id: i64, user_id: i64) -> Result<(bool, i64)> {
    let removed = sqlx::query("DELETE FROM album_likes WHERE album_id = ? AND user_id = ?")
        .bind(album_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to remove album like")?;

    let liked = if removed.rows_affected() > 0 {
        sqlx::query("UPDATE albums SET like_count = MAX(0, like_count - 1) WHERE id = ?")
            .bind(album_id)
            .execute(pool)
            .await?;
        false
    } else {
        let added = sqlx::query("INSERT OR IGNORE INTO album_likes (album_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(album_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(pool)
            .await
            .context("Failed to add album like")?;
        if added.rows_affected() > 0 {
            sqlx::query("UPDATE albums SET like_count = like_count + 1 WHERE id = ?")
                .bind(album_id)
                .execute(pool)
                .await?;
        }
        true
    };

    let count: i64 = sqlx::query(LIKE_COUNT)
        .bind(album_id)
        .fetch_one(pool)
        .await
        .context("Failed to read like count")?
        .get("like_count");
    Ok((liked, count))
}

fn row_to_album_sqlite(row: &SqliteRow) -> Album {
    let privacy: String = row.get("privacy");
    Album {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        description: row.get("description"),
        cover_url: row.get("cover_url"),
        privacy: PrivacyMode::from_stored(&privacy),
        target_emails: row.get("target_emails"),
        like_count: row.get("like_count"),
        view_count: row.get("view_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_album_mysql(pool: &MySqlPool, input: &CreateAlbumInput) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO albums (user_id, title, description, privacy, target_emails, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.user_id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(input.privacy.as_str())
    .bind(&input.target_emails)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create album")?;
    Ok(result.last_insert_id() as i64)
}

async fn find_albums_mysql(pool: &MySqlPool, query: &AlbumQuery) -> Result<Vec<Album>> {
    let sql = find_sql(query);
    let mut q = sqlx::query(&sql);
    if let Some(owner) = query.owner_id {
        q = q.bind(owner);
    }
    if let Some(search) = &query.search {
        q = q.bind(format!("%{}%", search.trim().to_lowercase()));
    }
    let rows = q.fetch_all(pool).await.context("Failed to list albums")?;
    Ok(rows.iter().map(row_to_album_mysql).collect())
}

async fn add_tags_mysql(pool: &MySqlPool, album_id: i64, names: &[String]) -> Result<()> {
    for name in normalized_tags(names) {
        sqlx::query("INSERT IGNORE INTO tags (name) VALUES (?)")
            .bind(&name)
            .execute(pool)
            .await
            .context("Failed to create tag")?;
        sqlx::query(
            "INSERT IGNORE INTO album_tags (album_id, tag_id) SELECT ?, id FROM tags WHERE name = ?",
        )
        .bind(album_id)
        .bind(&name)
        .execute(pool)
        .await
        .context("Failed to link tag")?;
    }
    Ok(())
}

async fn toggle_like_mysql(pool: &MySqlPool, album_id: i64, user_id: i64) -> Result<(bool, i64)> {
    let removed = sqlx::query("DELETE FROM album_likes WHERE album_id = ? AND user_id = ?")
        .bind(album_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to remove album like")?;

    let liked = if removed.rows_affected() > 0 {
        sqlx::query("UPDATE albums SET like_count = GREATEST(0, like_count - 1) WHERE id = ?")
            .bind(album_id)
            .execute(pool)
            .await?;
        false
    } else {
        let added = sqlx::query("INSERT IGNORE INTO album_likes (album_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(album_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(pool)
            .await
            .context("Failed to add album like")?;
        if added.rows_affected() > 0 {
            sqlx::query("UPDATE albums SET like_count = like_count + 1 WHERE id = ?")
                .bind(album_id)
                .execute(pool)
                .await?;
        }
        true
    };

    let count: i64 = sqlx::query(LIKE_COUNT)
        .bind(album_id)
        .fetch_one(pool)
        .await
        .context("Failed to read like count")?
        .get("like_count");
    Ok((liked, count))
}

fn row_to_album_mysql(row: &MySqlRow) -> Album {
    let privacy: String = row.get("privacy");
    Album {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        description: row.get("description"),
        cover_url: row.get("cover_url"),
        privacy: PrivacyMode::from_stored(&privacy),
        target_emails: row.get("target_emails"),
        like_count: row.get("like_count"),
        view_count: row.get("view_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::CreateUserInput;

    async fn setup() -> (SqlxAlbumRepository, i64, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::new(pool.clone());
        let mut ids = Vec::new();
        for email in ["owner@example.com", "other@example.com"] {
            ids.push(
                users
                    .create(&CreateUserInput {
                        first_name: "F".to_string(),
                        last_name: "L".to_string(),
                        email: email.to_string(),
                        password_hash: "h".to_string(),
                        subscription_tier_id: 1,
                    })
                    .await
                    .unwrap()
                    .id,
            );
        }
        (SqlxAlbumRepository::new(pool), ids[0], ids[1])
    }

    fn album(owner: i64, title: &str, privacy: PrivacyMode) -> CreateAlbumInput {
        CreateAlbumInput {
            user_id: owner,
            title: title.to_string(),
            description: String::new(),
            privacy,
            target_emails: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_album() {
        let (repo, owner, _) = setup().await;
        let created = repo
            .create(&CreateAlbumInput {
                target_emails: Some(r#"["a@x.com"]"#.to_string()),
                ..album(owner, "Beach", PrivacyMode::Restricted)
            })
            .await
            .unwrap();

        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Beach");
        assert_eq!(found.privacy, PrivacyMode::Restricted);
        assert_eq!(found.parse_target_emails().unwrap(), vec!["a@x.com"]);
        assert_eq!(found.view_count, 0);
    }

    #[tokio::test]
    async fn test_find_excludes_private_unless_requested() {
        let (repo, owner, _) = setup().await;
        repo.create(&album(owner, "Open", PrivacyMode::Public)).await.unwrap();
        repo.create(&album(owner, "Secret", PrivacyMode::Private)).await.unwrap();
        repo.create(&album(owner, "Friends", PrivacyMode::Restricted)).await.unwrap();

        let others_view = repo
            .find(&AlbumQuery {
                owner_id: Some(owner),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(others_view.len(), 2);
        assert!(others_view.iter().all(|a| a.privacy != PrivacyMode::Private));

        let own_view = repo
            .find(&AlbumQuery {
                owner_id: Some(owner),
                include_private: true,
                search: Some("SEC".to_string()),
                sort: AlbumSort::Recent,
            })
            .await
            .unwrap();
        assert_eq!(own_view.len(), 1);
        assert_eq!(own_view[0].title, "Secret");
    }

    #[tokio::test]
    async fn test_view_count_increments_by_one_per_call() {
        let (repo, owner, _) = setup().await;
        let created = repo.create(&album(owner, "Views", PrivacyMode::Public)).await.unwrap();

        for _ in 0..5 {
            repo.increment_view_count(created.id).await.unwrap();
        }
        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.view_count, 5);
    }

    #[tokio::test]
    async fn test_update_privacy_and_targets() {
        let (repo, owner, _) = setup().await;
        let created = repo.create(&album(owner, "Old", PrivacyMode::Public)).await.unwrap();

        let updated = repo
            .update(
                created.id,
                &UpdateAlbumInput {
                    title: Some("New".to_string()),
                    privacy: Some(PrivacyMode::Restricted),
                    target_emails: Some(Some(r#"["b@x.com"]"#.to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "New");
        assert_eq!(updated.privacy, PrivacyMode::Restricted);
        assert_eq!(updated.parse_target_emails().unwrap(), vec!["b@x.com"]);

        let cleared = repo
            .update(
                created.id,
                &UpdateAlbumInput {
                    privacy: Some(PrivacyMode::Public),
                    target_emails: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.target_emails.is_none());
        assert_eq!(cleared.title, "New");
    }

    #[tokio::test]
    async fn test_tags_are_deduplicated_and_shared() {
        let (repo, owner, _) = setup().await;
        let a = repo.create(&album(owner, "A", PrivacyMode::Public)).await.unwrap();
        let b = repo.create(&album(owner, "B", PrivacyMode::Public)).await.unwrap();

        repo.add_tags(a.id, &["sea".to_string(), " sea ".to_string(), "sun".to_string()])
            .await
            .unwrap();
        repo.add_tags(b.id, &["sea".to_string()]).await.unwrap();
        repo.add_tags(a.id, &["sun".to_string()]).await.unwrap();

        assert_eq!(repo.tags_for(a.id).await.unwrap(), vec!["sea", "sun"]);
        assert_eq!(repo.tags_for(b.id).await.unwrap(), vec!["sea"]);
    }

    #[tokio::test]
    async fn test_toggle_like() {
        let (repo, owner, other) = setup().await;
        let created = repo.create(&album(owner, "Liked", PrivacyMode::Public)).await.unwrap();

        assert_eq!(repo.toggle_like(created.id, other).await.unwrap(), (true, 1));
        assert_eq!(repo.toggle_like(created.id, owner).await.unwrap(), (true, 2));
        assert_eq!(repo.toggle_like(created.id, other).await.unwrap(), (false, 1));
    }

    #[tokio::test]
    async fn test_find_by_owners_and_delete() {
        let (repo, owner, other) = setup().await;
        repo.create(&album(owner, "Mine", PrivacyMode::Public)).await.unwrap();
        repo.create(&album(owner, "Hidden", PrivacyMode::Private)).await.unwrap();
        let theirs = repo.create(&album(other, "Theirs", PrivacyMode::Public)).await.unwrap();

        let feed = repo.find_by_owners(&[owner]).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].title, "Mine");
        assert!(repo.find_by_owners(&[]).await.unwrap().is_empty());

        assert!(repo.delete(theirs.id).await.unwrap());
        assert!(!repo.delete(theirs.id).await.unwrap());
        assert!(repo.get_by_id(theirs.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_before() {
        let (repo, owner, _) = setup().await;
        let created = repo.create(&album(owner, "Old", PrivacyMode::Public)).await.unwrap();

        let past = Utc::now() - chrono::Duration::days(1);
        assert!(repo.stale_before(past).await.unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::days(1);
        let stale = repo.stale_before(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, created.id);
    }
}
