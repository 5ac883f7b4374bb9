//! User repository
//!
//! Accounts, account configuration (two-factor settings) and follow edges.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{AccountConfig, CreateUserInput, UpdateProfileInput, User, UserStats, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: &CreateUserInput) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn get_by_user_name(&self, user_name: &str) -> Result<Option<User>>;

    /// Apply the `Some` fields of `input` and return the updated row
    async fn update_profile(&self, id: i64, input: &UpdateProfileInput) -> Result<User>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn set_status(
        &self,
        id: i64,
        status: UserStatus,
        deactivated_until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn set_profile_picture(&self, id: i64, url: Option<&str>) -> Result<()>;

    async fn set_subscription_tier(&self, id: i64, tier_id: i64) -> Result<()>;

    /// Returns a disabled config when the user has none stored
    async fn get_account_config(&self, user_id: i64) -> Result<AccountConfig>;

    async fn save_account_config(&self, config: &AccountConfig) -> Result<()>;

    /// Add or remove the edge; returns true when the follower now follows
    async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<bool>;

    async fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool>;

    /// Ids of the users `follower_id` follows
    async fn following_ids(&self, follower_id: i64) -> Result<Vec<i64>>;

    async fn stats(&self, user_id: i64) -> Result<UserStats>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, full_name, user_name, email, password_hash, \
    phone, bio, address, job_title, state, zip_code, city, company_name, profile_picture, \
    tag_preferences, social_media, subscription_tier_id, status, deactivated_until, created_at, updated_at";

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(sqlite_pool(&self.pool)?, input).await?,
            DatabaseDriver::Mysql => create_user_mysql(mysql_pool(&self.pool)?, input).await?,
        };
        self.get_by_id(id)
            .await?
            .context("Created user not found")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => fetch_user_sqlite(sqlite_pool(&self.pool)?, &sql, Lookup::Id(id)).await,
            DatabaseDriver::Mysql => fetch_user_mysql(mysql_pool(&self.pool)?, &sql, Lookup::Id(id)).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => fetch_user_sqlite(sqlite_pool(&self.pool)?, &sql, Lookup::Text(email)).await,
            DatabaseDriver::Mysql => fetch_user_mysql(mysql_pool(&self.pool)?, &sql, Lookup::Text(email)).await,
        }
    }

    async fn get_by_user_name(&self, user_name: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE user_name = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_user_sqlite(sqlite_pool(&self.pool)?, &sql, Lookup::Text(user_name)).await
            }
            DatabaseDriver::Mysql => {
                fetch_user_mysql(mysql_pool(&self.pool)?, &sql, Lookup::Text(user_name)).await
            }
        }
    }

    async fn update_profile(&self, id: i64, input: &UpdateProfileInput) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_profile_sqlite(sqlite_pool(&self.pool)?, id, input).await?,
            DatabaseDriver::Mysql => update_profile_mysql(mysql_pool(&self.pool)?, id, input).await?,
        }
        self.get_by_id(id).await?.context("User not found after update")
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let sql = "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(password_hash)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update password")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(password_hash)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update password")?;
            }
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: i64,
        status: UserStatus,
        deactivated_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sql = "UPDATE users SET status = ?, deactivated_until = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(status.to_string())
                    .bind(deactivated_until)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update user status")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(status.to_string())
                    .bind(deactivated_until)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update user status")?;
            }
        }
        Ok(())
    }

    async fn set_profile_picture(&self, id: i64, url: Option<&str>) -> Result<()> {
        let sql = "UPDATE users SET profile_picture = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(url)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update profile picture")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(url)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update profile picture")?;
            }
        }
        Ok(())
    }

    async fn set_subscription_tier(&self, id: i64, tier_id: i64) -> Result<()> {
        let sql = "UPDATE users SET subscription_tier_id = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(tier_id)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update subscription tier")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(tier_id)
                    .bind(now)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update subscription tier")?;
            }
        }
        Ok(())
    }

    async fn get_account_config(&self, user_id: i64) -> Result<AccountConfig> {
        let sql = "SELECT user_id, two_factor_enabled, two_factor_method, totp_secret FROM account_configs WHERE user_id = ?";
        let config = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(user_id)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get account config")?
                .map(|row| AccountConfig {
                    user_id: row.get("user_id"),
                    two_factor_enabled: row.get("two_factor_enabled"),
                    two_factor_method: row.get("two_factor_method"),
                    totp_secret: row.get("totp_secret"),
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(user_id)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get account config")?
                .map(|row| AccountConfig {
                    user_id: row.get("user_id"),
                    two_factor_enabled: row.get("two_factor_enabled"),
                    two_factor_method: row.get("two_factor_method"),
                    totp_secret: row.get("totp_secret"),
                }),
        };
        Ok(config.unwrap_or(AccountConfig {
            user_id,
            ..AccountConfig::default()
        }))
    }

    async fn save_account_config(&self, config: &AccountConfig) -> Result<()> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(
                    r#"
                    INSERT INTO account_configs (user_id, two_factor_enabled, two_factor_method, totp_secret, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(user_id) DO UPDATE SET
                        two_factor_enabled = excluded.two_factor_enabled,
                        two_factor_method = excluded.two_factor_method,
                        totp_secret = excluded.totp_secret,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(config.user_id)
                .bind(config.two_factor_enabled)
                .bind(&config.two_factor_method)
                .bind(&config.totp_secret)
                .bind(now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to save account config")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(
                    r#"
                    INSERT INTO account_configs (user_id, two_factor_enabled, two_factor_method, totp_secret, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON DUPLICATE KEY UPDATE
                        two_factor_enabled = VALUES(two_factor_enabled),
                        two_factor_method = VALUES(two_factor_method),
                        totp_secret = VALUES(totp_secret),
                        updated_at = VALUES(updated_at)
                    "#,
                )
                .bind(config.user_id)
                .bind(config.two_factor_enabled)
                .bind(&config.two_factor_method)
                .bind(&config.totp_secret)
                .bind(now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to save account config")?;
            }
        }
        Ok(())
    }

    async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                toggle_follow_sqlite(sqlite_pool(&self.pool)?, follower_id, following_id).await
            }
            DatabaseDriver::Mysql => {
                toggle_follow_mysql(mysql_pool(&self.pool)?, follower_id, following_id).await
            }
        }
    }

    async fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let sql = "SELECT COUNT(*) AS c FROM follows WHERE follower_id = ? AND following_id = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(follower_id)
                .bind(following_id)
                .fetch_one(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to check follow")?
                .get("c"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(follower_id)
                .bind(following_id)
                .fetch_one(mysql_pool(&self.pool)?)
                .await
                .context("Failed to check follow")?
                .get("c"),
        };
        Ok(count > 0)
    }

    async fn following_ids(&self, follower_id: i64) -> Result<Vec<i64>> {
        let sql = "SELECT following_id FROM follows WHERE follower_id = ?";
        let ids = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(follower_id)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list followed users")?
                .iter()
                .map(|r| r.get("following_id"))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(follower_id)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list followed users")?
                .iter()
                .map(|r| r.get("following_id"))
                .collect(),
        };
        Ok(ids)
    }

    async fn stats(&self, user_id: i64) -> Result<UserStats> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => stats_sqlite(sqlite_pool(&self.pool)?, user_id).await,
            DatabaseDriver::Mysql => stats_mysql(mysql_pool(&self.pool)?, user_id).await,
        }
    }
}

const INSERT_USER: &str = r#"
    INSERT INTO users (first_name, last_name, email, password_hash, tag_preferences,
                       subscription_tier_id, status, created_at, updated_at)
    VALUES (?, ?, ?, ?, '[]', ?, 'active', ?, ?)
"#;

const UPDATE_PROFILE: &str = r#"
    UPDATE users SET
        full_name = COALESCE(?, full_name),
        user_name = COALESCE(?, user_name),
        email = COALESCE(?, email),
        phone = COALESCE(?, phone),
        bio = COALESCE(?, bio),
        address = COALESCE(?, address),
        job_title = COALESCE(?, job_title),
        state = COALESCE(?, state),
        zip_code = COALESCE(?, zip_code),
        city = COALESCE(?, city),
        company_name = COALESCE(?, company_name),
        tag_preferences = COALESCE(?, tag_preferences),
        social_media = COALESCE(?, social_media),
        updated_at = ?
    WHERE id = ?
"#;

const STATS_MEDIA: &str = "SELECT COUNT(*) AS c FROM album_media m JOIN albums a ON a.id = m.album_id WHERE a.user_id = ?";
const STATS_FOLLOWERS: &str = "SELECT COUNT(*) AS c FROM follows WHERE following_id = ?";
const STATS_FOLLOWING: &str = "SELECT COUNT(*) AS c FROM follows WHERE follower_id = ?";

/// Key for single-user lookups
enum Lookup<'a> {
    Id(i64),
    Text(&'a str),
}

fn profile_json_columns(input: &UpdateProfileInput) -> (Option<String>, Option<String>) {
    let tags = input
        .tag_preferences
        .as_ref()
        .map(|t| serde_json::to_string(t).unwrap_or_else(|_| "[]".to_string()));
    let social = input.social_media.as_ref().map(|v| v.to_string());
    (tags, social)
}

fn parse_tag_preferences(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn parse_social_media(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, input: &CreateUserInput) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_USER)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(input.subscription_tier_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_rowid())
}

async fn fetch_user_sqlite(pool: &SqlitePool, sql: &str, key: Lookup<'_>) -> Result<Option<User>> {
    let query = match key {
        Lookup::Id(id) => sqlx::query(sql).bind(id),
        Lookup::Text(value) => sqlx::query(sql).bind(value.to_string()),
    };
    let row = query
        .fetch_optional(pool)
        .await
        .context("Failed to get user")?;
    Ok(row.as_ref().map(row_to_user_sqlite))
}

async fn update_profile_sqlite(pool: &SqlitePool, id: i64, input: &UpdateProfileInput) -> Result<()> {
    let (tags, social) = profile_json_columns(input);
    sqlx::query(UPDATE_PROFILE)
        .bind(&input.full_name)
        .bind(&input.user_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.bio)
        .bind(&input.address)
        .bind(&input.job_title)
        .bind(&input.state)
        .bind(&input.zip_code)
        .bind(&input.city)
        .bind(&input.company_name)
        .bind(tags)
        .bind(social)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update user profile")?;
    Ok(())
}

async fn toggle_follow_sqlite(pool: &SqlitePool, follower_id: i64, following_id: i64) -> Result<bool> {
    let removed = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
        .bind(follower_id)
        .bind(following_id)
        .execute(pool)
        .await
        .context("Failed to remove follow")?;
    if removed.rows_affected() > 0 {
        return Ok(false);
    }

    sqlx::query("INSERT OR IGNORE INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)")
        .bind(follower_id)
        .bind(following_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to add follow")?;
    Ok(true)
}

async fn stats_sqlite(pool: &SqlitePool, user_id: i64) -> Result<UserStats> {
    let mut counts = [0i64; 3];
    for (slot, sql) in counts.iter_mut().zip([STATS_MEDIA, STATS_FOLLOWERS, STATS_FOLLOWING]) {
        *slot = sqlx::query(sql)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("Failed to count user stats")?
            .get("c");
    }
    Ok(UserStats {
        media_count: counts[0],
        followers: counts[1],
        following: counts[2],
    })
}

fn row_to_user_sqlite(row: &SqliteRow) -> User {
    let status: String = row.get("status");
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        full_name: row.get("full_name"),
        user_name: row.get("user_name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        phone: row.get("phone"),
        bio: row.get("bio"),
        address: row.get("address"),
        job_title: row.get("job_title"),
        state: row.get("state"),
        zip_code: row.get("zip_code"),
        city: row.get("city"),
        company_name: row.get("company_name"),
        profile_picture: row.get("profile_picture"),
        tag_preferences: parse_tag_preferences(row.get("tag_preferences")),
        social_media: parse_social_media(row.get("social_media")),
        subscription_tier_id: row.get("subscription_tier_id"),
        status: UserStatus::from_str(&status).unwrap_or_default(),
        deactivated_until: row.get("deactivated_until"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, input: &CreateUserInput) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_USER)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(input.subscription_tier_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_id() as i64)
}

async fn fetch_user_mysql(pool: &MySqlPool, sql: &str, key: Lookup<'_>) -> Result<Option<User>> {
    let query = match key {
        Lookup::Id(id) => sqlx::query(sql).bind(id),
        Lookup::Text(value) => sqlx::query(sql).bind(value.to_string()),
    };
    let row = query
        .fetch_optional(pool)
        .await
        .context("Failed to get user")?;
    Ok(row.as_ref().map(row_to_user_mysql))
}

async fn update_profile_mysql(pool: &MySqlPool, id: i64, input: &UpdateProfileInput) -> Result<()> {
    let (tags, social) = profile_json_columns(input);
    sqlx::query(UPDATE_PROFILE)
        .bind(&input.full_name)
        .bind(&input.user_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.bio)
        .bind(&input.address)
        .bind(&input.job_title)
        .bind(&input.state)
        .bind(&input.zip_code)
        .bind(&input.city)
        .bind(&input.company_name)
        .bind(tags)
        .bind(social)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update user profile")?;
    Ok(())
}

async fn toggle_follow_mysql(pool: &MySqlPool, follower_id: i64, following_id: i64) -> Result<bool> {
    let removed = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
        .bind(follower_id)
        .bind(following_id)
        .execute(pool)
        .await
        .context("Failed to remove follow")?;
    if removed.rows_affected() > 0 {
        return Ok(false);
    }

    sqlx::query("INSERT IGNORE INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)")
        .bind(follower_id)
        .bind(following_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to add follow")?;
    Ok(true)
}

async fn stats_mysql(pool: &MySqlPool, user_id: i64) -> Result<UserStats> {
    let mut counts = [0i64; 3];
    for (slot, sql) in counts.iter_mut().zip([STATS_MEDIA, STATS_FOLLOWERS, STATS_FOLLOWING]) {
        *slot = sqlx::query(sql)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("Failed to count user stats")?
            .get("c");
    }
    Ok(UserStats {
        media_count: counts[0],
        followers: counts[1],
        following: counts[2],
    })
}

fn row_to_user_mysql(row: &MySqlRow) -> User {
    let status: String = row.get("status");
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        full_name: row.get("full_name"),
        user_name: row.get("user_name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        phone: row.get("phone"),
        bio: row.get("bio"),
        address: row.get("address"),
        job_title: row.get("job_title"),
        state: row.get("state"),
        zip_code: row.get("zip_code"),
        city: row.get("city"),
        company_name: row.get("company_name"),
        profile_picture: row.get("profile_picture"),
        tag_preferences: parse_tag_preferences(row.get("tag_preferences")),
        social_media: parse_social_media(row.get("social_media")),
        subscription_tier_id: row.get("subscription_tier_id"),
        status: UserStatus::from_str(&status).unwrap_or_default(),
        deactivated_until: row.get("deactivated_until"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
