//! Access token repository
//!
//! Issued JWT pairs are persisted so they can be revoked before expiry.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{AccessToken, NewAccessToken};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn create(&self, token: &NewAccessToken) -> Result<AccessToken>;

    /// Non-revoked row holding this access token
    async fn find_by_access(&self, access_token: &str) -> Result<Option<AccessToken>>;

    /// Non-revoked row holding this refresh token
    async fn find_by_refresh(&self, refresh_token: &str) -> Result<Option<AccessToken>>;

    /// Swap in a freshly minted access token after a refresh
    async fn update_access(&self, id: i64, access_token: &str, expires_at: DateTime<Utc>) -> Result<()>;

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64>;

    async fn delete_all_for_user(&self, user_id: i64) -> Result<u64>;
}

pub struct SqlxTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxTokenRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TokenRepository> {
        Arc::new(Self::new(pool))
    }

    async fn find_by(&self, column: &str, value: &str) -> Result<Option<AccessToken>> {
        let sql = format!(
            "SELECT {} FROM access_tokens WHERE {} = ? AND revoked = ? ORDER BY id DESC LIMIT 1",
            TOKEN_COLUMNS, column
        );
        let token = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(value)
                .bind(false)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to look up token")?
                .as_ref()
                .map(row_to_token_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(value)
                .bind(false)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to look up token")?
                .as_ref()
                .map(row_to_token_mysql),
        };
        Ok(token)
    }
}

const TOKEN_COLUMNS: &str = "id, user_id, access_token, refresh_token, ip_address, \
    access_expires_at, refresh_expires_at, revoked, created_at, updated_at";

const INSERT_TOKEN: &str = r#"
    INSERT INTO access_tokens (user_id, access_token, refresh_token, ip_address,
        access_expires_at, refresh_expires_at, revoked, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl TokenRepository for SqlxTokenRepository {
    async fn create(&self, token: &NewAccessToken) -> Result<AccessToken> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_TOKEN)
                .bind(token.user_id)
                .bind(&token.access_token)
                .bind(&token.refresh_token)
                .bind(&token.ip_address)
                .bind(token.access_expires_at)
                .bind(token.refresh_expires_at)
                .bind(false)
                .bind(now)
                .bind(now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to store token")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_TOKEN)
                .bind(token.user_id)
                .bind(&token.access_token)
                .bind(&token.refresh_token)
                .bind(&token.ip_address)
                .bind(token.access_expires_at)
                .bind(token.refresh_expires_at)
                .bind(false)
                .bind(now)
                .bind(now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to store token")?
                .last_insert_id() as i64,
        };
        Ok(AccessToken {
            id,
            user_id: token.user_id,
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            ip_address: token.ip_address.clone(),
            access_expires_at: token.access_expires_at,
            refresh_expires_at: token.refresh_expires_at,
            revoked: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_by_access(&self, access_token: &str) -> Result<Option<AccessToken>> {
        self.find_by("access_token", access_token).await
    }

    async fn find_by_refresh(&self, refresh_token: &str) -> Result<Option<AccessToken>> {
        self.find_by("refresh_token", refresh_token).await
    }

    async fn update_access(&self, id: i64, access_token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let sql = "UPDATE access_tokens SET access_token = ?, access_expires_at = ?, updated_at = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(access_token)
                    .bind(expires_at)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update access token")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(access_token)
                    .bind(expires_at)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update access token")?;
            }
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64> {
        let sql = "UPDATE access_tokens SET revoked = ?, updated_at = ? WHERE user_id = ? AND revoked = ?";
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(true)
                .bind(now)
                .bind(user_id)
                .bind(false)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to revoke tokens")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(true)
                .bind(now)
                .bind(user_id)
                .bind(false)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to revoke tokens")?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn delete_all_for_user(&self, user_id: i64) -> Result<u64> {
        let sql = "DELETE FROM access_tokens WHERE user_id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(user_id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to delete tokens")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(user_id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to delete tokens")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

fn row_to_token_sqlite(row: &SqliteRow) -> AccessToken {
    AccessToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        ip_address: row.get("ip_address"),
        access_expires_at: row.get("access_expires_at"),
        refresh_expires_at: row.get("refresh_expires_at"),
        revoked: row.get("revoked"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

fn row_to_token_mysql(row: &MySqlRow) -> AccessToken {
    AccessToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        ip_address: row.get("ip_address"),
        access_expires_at: row.get("access_expires_at"),
        refresh_expires_at: row.get("refresh_expires_at"),
        revoked: row.get("revoked"),
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
    use chrono::Duration;

    async fn setup() -> (SqlxTokenRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let user = SqlxUserRepository::new(pool.clone())
            .create(&CreateUserInput {
                first_name: "T".to_string(),
                last_name: "K".to_string(),
                email: "token@example.com".to_string(),
                password_hash: "h".to_string(),
                subscription_tier_id: 1,
            })
            .await
            .unwrap();
        (SqlxTokenRepository::new(pool), user.id)
    }

    fn pair(user_id: i64, suffix: &str) -> NewAccessToken {
        let now = Utc::now();
        NewAccessToken {
            user_id,
            access_token: format!("access-{}", suffix),
            refresh_token: format!("refresh-{}", suffix),
            ip_address: "127.0.0.1".to_string(),
            access_expires_at: now + Duration::hours(2),
            refresh_expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (repo, user_id) = setup().await;
        let stored = repo.create(&pair(user_id, "a")).await.unwrap();

        let by_access = repo.find_by_access("access-a").await.unwrap().unwrap();
        assert_eq!(by_access.id, stored.id);
        let by_refresh = repo.find_by_refresh("refresh-a").await.unwrap().unwrap();
        assert_eq!(by_refresh.user_id, user_id);
        assert!(repo.find_by_access("access-zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoked_tokens_are_not_found() {
        let (repo, user_id) = setup().await;
        repo.create(&pair(user_id, "a")).await.unwrap();
        repo.create(&pair(user_id, "b")).await.unwrap();

        assert_eq!(repo.revoke_all_for_user(user_id).await.unwrap(), 2);
        assert!(repo.find_by_access("access-a").await.unwrap().is_none());
        assert!(repo.find_by_refresh("refresh-b").await.unwrap().is_none());
        assert_eq!(repo.revoke_all_for_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_access_and_delete() {
        let (repo, user_id) = setup().await;
        let stored = repo.create(&pair(user_id, "a")).await.unwrap();

        repo.update_access(stored.id, "access-new", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(repo.find_by_access("access-a").await.unwrap().is_none());
        assert!(repo.find_by_access("access-new").await.unwrap().is_some());

        assert_eq!(repo.delete_all_for_user(user_id).await.unwrap(), 1);
        assert!(repo.find_by_refresh("refresh-a").await.unwrap().is_none());
    }
}
