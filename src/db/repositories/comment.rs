//! Comment repository

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{Comment, CommentWithAuthor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(&self, album_id: i64, user_id: i64, content: &str) -> Result<Comment>;

    /// Comments of an album, newest first, with author details
    async fn list_by_album(&self, album_id: i64) -> Result<Vec<CommentWithAuthor>>;
}

pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_COMMENT: &str =
    "INSERT INTO album_comments (album_id, user_id, content, created_at) VALUES (?, ?, ?, ?)";

const LIST_BY_ALBUM: &str = r#"
    SELECT c.id, c.album_id, c.user_id, c.content, c.created_at,
           u.first_name, u.last_name, u.full_name, u.profile_picture
    FROM album_comments c
    JOIN users u ON u.id = c.user_id
    WHERE c.album_id = ?
    ORDER BY c.created_at DESC, c.id DESC
"#;

/// `full_name` wins when set, otherwise "first last"
fn author_name(first: String, last: String, full: Option<String>) -> String {
    match full {
        Some(name) if !name.trim().is_empty() => name,
        _ => format!("{} {}", first, last).trim().to_string(),
    }
}

macro_rules! row_to_comment_with_author {
    ($row:expr) => {{
        let row = $row;
        CommentWithAuthor {
            comment: Comment {
                id: row.get("id"),
                album_id: row.get("album_id"),
                user_id: row.get("user_id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            },
            author_name: author_name(row.get("first_name"), row.get("last_name"), row.get("full_name")),
            author_picture: row.get("profile_picture"),
        }
    }};
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, album_id: i64, user_id: i64, content: &str) -> Result<Comment> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_COMMENT)
                .bind(album_id)
                .bind(user_id)
                .bind(content)
                .bind(now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to create comment")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_COMMENT)
                .bind(album_id)
                .bind(user_id)
                .bind(content)
                .bind(now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to create comment")?
                .last_insert_id() as i64,
        };
        Ok(Comment {
            id,
            album_id,
            user_id,
            content: content.to_string(),
            created_at: now,
        })
    }

    async fn list_by_album(&self, album_id: i64) -> Result<Vec<CommentWithAuthor>> {
        let comments = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(LIST_BY_ALBUM)
                .bind(album_id)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list comments")?
                .iter()
                .map(|row| row_to_comment_with_author!(row))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(LIST_BY_ALBUM)
                .bind(album_id)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list comments")?
                .iter()
                .map(|row| row_to_comment_with_author!(row))
                .collect(),
        };
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{AlbumRepository, SqlxAlbumRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreateAlbumInput, CreateUserInput, PrivacyMode, UpdateProfileInput};

    #[tokio::test]
    async fn test_comments_newest_first_with_author() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let author = users
            .create(&CreateUserInput {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                password_hash: "h".to_string(),
                subscription_tier_id: 1,
            })
            .await
            .unwrap();
        let album = SqlxAlbumRepository::new(pool.clone())
            .create(&CreateAlbumInput {
                user_id: author.id,
                title: "Trip".to_string(),
                description: String::new(),
                privacy: PrivacyMode::Public,
                target_emails: None,
            })
            .await
            .unwrap();

        let repo = SqlxCommentRepository::new(pool);
        repo.create(album.id, author.id, "first").await.unwrap();
        repo.create(album.id, author.id, "second").await.unwrap();

        let listed = repo.list_by_album(album.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].comment.content, "second");
        assert_eq!(listed[0].author_name, "Ada Lovelace");

        users
            .update_profile(
                author.id,
                &UpdateProfileInput {
                    full_name: Some("Countess".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let listed = repo.list_by_album(album.id).await.unwrap();
        assert_eq!(listed[1].author_name, "Countess");
    }

    #[test]
    fn test_author_name_fallback() {
        assert_eq!(author_name("A".into(), "B".into(), None), "A B");
        assert_eq!(author_name("A".into(), "B".into(), Some("  ".into())), "A B");
        assert_eq!(author_name("A".into(), "B".into(), Some("Z".into())), "Z");
    }
}
