//! Subscription repository
//!
//! Tier catalogue and the per-user subscription history. A tier change is a
//! single transaction: expire the active record, insert the new one and move
//! the user's tier reference.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{
    NewSubscription, SubscriptionHistoryEntry, SubscriptionHistoryFilter, SubscriptionStatus,
    SubscriptionTier, UserSubscription,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>>;

    async fn get_tier(&self, id: i64) -> Result<Option<SubscriptionTier>>;

    async fn get_tier_by_name(&self, name: &str) -> Result<Option<SubscriptionTier>>;

    /// Insert an active record without touching existing ones (signup)
    async fn create(&self, input: &NewSubscription) -> Result<UserSubscription>;

    /// Expire the user's active records, insert `input` as active and point
    /// the user at its tier, atomically
    async fn replace_active(&self, input: &NewSubscription) -> Result<UserSubscription>;

    async fn active_for_user(&self, user_id: i64) -> Result<Option<UserSubscription>>;

    async fn history(&self, filter: &SubscriptionHistoryFilter) -> Result<Vec<SubscriptionHistoryEntry>>;

    /// Mark active records whose end date is before `now` as expired
    async fn expire_ended(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxSubscriptionRepository {
    pool: DynDatabasePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SubscriptionRepository> {
        Arc::new(Self::new(pool))
    }
}

const TIER_COLUMNS: &str = "id, name, capacity_gb, max_media_size_gb, features, price";
const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, tier_id, status, description, payment_method, amount, start_date, end_date, created_at";
const INSERT_SUBSCRIPTION: &str = r#"
    INSERT INTO user_subscriptions
        (user_id, tier_id, status, description, payment_method, amount, start_date, end_date, created_at)
    VALUES (?, ?, 'active', ?, ?, ?, ?, ?, ?)
"#;
const EXPIRE_ACTIVE: &str =
    "UPDATE user_subscriptions SET status = 'expired' WHERE user_id = ? AND status = 'active'";
const HISTORY_SELECT: &str = r#"
    SELECT u.first_name, u.last_name, s.payment_method, t.name AS tier_name,
           s.amount, s.status, s.created_at
    FROM user_subscriptions s
    JOIN users u ON u.id = s.user_id
    JOIN subscription_tiers t ON t.id = s.tier_id
"#;

/// Build the history query; binds are user_id? then (start, end)? then (pattern, pattern)?
fn history_sql(filter: &SubscriptionHistoryFilter) -> String {
    let mut conditions = Vec::new();
    if filter.user_id.is_some() {
        conditions.push("s.user_id = ?");
    }
    if filter.range.is_some() {
        conditions.push("s.created_at BETWEEN ? AND ?");
    }
    if filter.search.is_some() {
        conditions.push("(LOWER(u.first_name) LIKE ? OR LOWER(u.last_name) LIKE ?)");
    }
    let mut sql = HISTORY_SELECT.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY s.created_at DESC, s.id DESC");
    sql
}

fn search_pattern(search: &str) -> String {
    format!("%{}%", search.trim().to_lowercase())
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>> {
        let sql = format!("SELECT {} FROM subscription_tiers ORDER BY id", TIER_COLUMNS);
        let tiers = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .fetch_all(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to list tiers")?
                .iter()
                .map(row_to_tier_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .fetch_all(mysql_pool(&self.pool)?)
                .await
                .context("Failed to list tiers")?
                .iter()
                .map(row_to_tier_mysql)
                .collect(),
        };
        Ok(tiers)
    }

    async fn get_tier(&self, id: i64) -> Result<Option<SubscriptionTier>> {
        let sql = format!("SELECT {} FROM subscription_tiers WHERE id = ?", TIER_COLUMNS);
        let tier = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get tier")?
                .as_ref()
                .map(row_to_tier_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get tier")?
                .as_ref()
                .map(row_to_tier_mysql),
        };
        Ok(tier)
    }

    async fn get_tier_by_name(&self, name: &str) -> Result<Option<SubscriptionTier>> {
        let sql = format!("SELECT {} FROM subscription_tiers WHERE name = ?", TIER_COLUMNS);
        let tier = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(name)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get tier by name")?
                .as_ref()
                .map(row_to_tier_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(name)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get tier by name")?
                .as_ref()
                .map(row_to_tier_mysql),
        };
        Ok(tier)
    }

    async fn create(&self, input: &NewSubscription) -> Result<UserSubscription> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_subscription_sqlite(sqlite_pool(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_subscription_mysql(mysql_pool(&self.pool)?, input).await,
        }
    }

    async fn replace_active(&self, input: &NewSubscription) -> Result<UserSubscription> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => replace_active_sqlite(sqlite_pool(&self.pool)?, input).await,
            DatabaseDriver::Mysql => replace_active_mysql(mysql_pool(&self.pool)?, input).await,
        }
    }

    async fn active_for_user(&self, user_id: i64) -> Result<Option<UserSubscription>> {
        let sql = format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = ? AND status = 'active' ORDER BY id DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        );
        let sub = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(user_id)
                .fetch_optional(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to get active subscription")?
                .as_ref()
                .map(row_to_subscription_sqlite),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(user_id)
                .fetch_optional(mysql_pool(&self.pool)?)
                .await
                .context("Failed to get active subscription")?
                .as_ref()
                .map(row_to_subscription_mysql),
        };
        Ok(sub)
    }

    async fn history(&self, filter: &SubscriptionHistoryFilter) -> Result<Vec<SubscriptionHistoryEntry>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => history_sqlite(sqlite_pool(&self.pool)?, filter).await,
            DatabaseDriver::Mysql => history_mysql(mysql_pool(&self.pool)?, filter).await,
        }
    }

    async fn expire_ended(&self, now: DateTime<Utc>) -> Result<u64> {
        let sql = "UPDATE user_subscriptions SET status = 'expired' WHERE status = 'active' AND end_date < ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to expire subscriptions")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to expire subscriptions")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

fn subscription_from_input(id: i64, input: &NewSubscription, now: DateTime<Utc>) -> UserSubscription {
    UserSubscription {
        id,
        user_id: input.user_id,
        tier_id: input.tier_id,
        status: SubscriptionStatus::Active,
        description: input.description.clone(),
        payment_method: input.payment_method.clone(),
        amount: input.amount,
        start_date: input.start_date,
        end_date: input.end_date,
        created_at: now,
    }
}

fn parse_features(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn parse_status(raw: String) -> SubscriptionStatus {
    SubscriptionStatus::from_str(&raw).unwrap_or(SubscriptionStatus::Expired)
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_subscription_sqlite(pool: &SqlitePool, input: &NewSubscription) -> Result<UserSubscription> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_SUBSCRIPTION)
        .bind(input.user_id)
        .bind(input.tier_id)
        .bind(&input.description)
        .bind(&input.payment_method)
        .bind(input.amount)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create subscription")?;
    Ok(subscription_from_input(result.last_insert_rowid(), input, now))
}

async fn replace_active_sqlite(pool: &SqlitePool, input: &NewSubscription) -> Result<UserSubscription> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(EXPIRE_ACTIVE)
        .bind(input.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to expire active subscriptions")?;

    let result = sqlx::query(INSERT_SUBSCRIPTION)
        .bind(input.user_id)
        .bind(input.tier_id)
        .bind(&input.description)
        .bind(&input.payment_method)
        .bind(input.amount)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert subscription")?;

    sqlx::query("UPDATE users SET subscription_tier_id = ?, updated_at = ? WHERE id = ?")
        .bind(input.tier_id)
        .bind(now)
        .bind(input.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update user tier")?;

    tx.commit().await.context("Failed to commit subscription change")?;
    Ok(subscription_from_input(result.last_insert_rowid(), input, now))
}

async fn history_sqlite(pool: &SqlitePool, filter: &SubscriptionHistoryFilter) -> Result<Vec<SubscriptionHistoryEntry>> {
    let sql = history_sql(filter);
    let mut query = sqlx::query(&sql);
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some((start, end)) = filter.range {
        query = query.bind(start).bind(end);
    }
    if let Some(search) = &filter.search {
        let pattern = search_pattern(search);
        query = query.bind(pattern.clone()).bind(pattern);
    }
    let rows = query.fetch_all(pool).await.context("Failed to list subscription history")?;
    Ok(rows.iter().map(row_to_history_sqlite).collect())
}

fn row_to_tier_sqlite(row: &SqliteRow) -> SubscriptionTier {
    SubscriptionTier {
        id: row.get("id"),
        name: row.get("name"),
        capacity_gb: row.get("capacity_gb"),
        max_media_size_gb: row.get("max_media_size_gb"),
        features: parse_features(row.get("features")),
        price: row.get("price"),
    }
}

fn row_to_subscription_sqlite(row: &SqliteRow) -> UserSubscription {
    UserSubscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        tier_id: row.get("tier_id"),
        status: parse_status(row.get("status")),
        description: row.get("description"),
        payment_method: row.get("payment_method"),
        amount: row.get("amount"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        created_at: row.get("created_at"),
    }
}

fn row_to_history_sqlite(row: &SqliteRow) -> SubscriptionHistoryEntry {
    let first: String = row.get("first_name");
    let last: String = row.get("last_name");
    SubscriptionHistoryEntry {
        customer_name: format!("{} {}", first, last),
        payment_method: row.get("payment_method"),
        tier_name: row.get("tier_name"),
        amount: row.get("amount"),
        status: parse_status(row.get("status")),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_subscription_mysql(pool: &MySqlPool, input: &NewSubscription) -> Result<UserSubscription> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_SUBSCRIPTION)
        .bind(input.user_id)
        .bind(input.tier_id)
        .bind(&input.description)
        .bind(&input.payment_method)
        .bind(input.amount)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create subscription")?;
    Ok(subscription_from_input(result.last_insert_id() as i64, input, now))
}

async fn replace_active_mysql(pool: &MySqlPool, input: &NewSubscription) -> Result<UserSubscription> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(EXPIRE_ACTIVE)
        .bind(input.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to expire active subscriptions")?;

    let result = sqlx::query(INSERT_SUBSCRIPTION)
        .bind(input.user_id)
        .bind(input.tier_id)
        .bind(&input.description)
        .bind(&input.payment_method)
        .bind(input.amount)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert subscription")?;

    sqlx::query("UPDATE users SET subscription_tier_id = ?, updated_at = ? WHERE id = ?")
        .bind(input.tier_id)
        .bind(now)
        .bind(input.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update user tier")?;

    tx.commit().await.context("Failed to commit subscription change")?;
    Ok(subscription_from_input(result.last_insert_id() as i64, input, now))
}

async fn history_mysql(pool: &MySqlPool, filter: &SubscriptionHistoryFilter) -> Result<Vec<SubscriptionHistoryEntry>> {
    let sql = history_sql(filter);
    let mut query = sqlx::query(&sql);
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some((start, end)) = filter.range {
        query = query.bind(start).bind(end);
    }
    if let Some(search) = &filter.search {
        let pattern = search_pattern(search);
        query = query.bind(pattern.clone()).bind(pattern);
    }
    let rows = query.fetch_all(pool).await.context("Failed to list subscription history")?;
    Ok(rows.iter().map(row_to_history_mysql).collect())
}

fn row_to_tier_mysql(row: &MySqlRow) -> SubscriptionTier {
    SubscriptionTier {
        id: row.get("id"),
        name: row.get("name"),
        capacity_gb: row.get("capacity_gb"),
        max_media_size_gb: row.get("max_media_size_gb"),
        features: parse_features(row.get("features")),
        price: row.get("price"),
    }
}

fn row_to_subscription_mysql(row: &MySqlRow) -> UserSubscription {
    UserSubscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        tier_id: row.get("tier_id"),
        status: parse_status(row.get("status")),
        description: row.get("description"),
        payment_method: row.get("payment_method"),
        amount: row.get("amount"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        created_at: row.get("created_at"),
    }
}

fn row_to_history_mysql(row: &MySqlRow) -> SubscriptionHistoryEntry {
    let first: String = row.get("first_name");
    let last: String = row.get("last_name");
    SubscriptionHistoryEntry {
        customer_name: format!("{} {}", first, last),
        payment_method: row.get("payment_method"),
        tier_name: row.get("tier_name"),
        amount: row.get("amount"),
        status: parse_status(row.get("status")),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::CreateUserInput;
    use chrono::Duration;

    async fn setup() -> (SqlxSubscriptionRepository, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        (
            SqlxSubscriptionRepository::new(pool.clone()),
            SqlxUserRepository::new(pool),
        )
    }

    async fn user(users: &SqlxUserRepository, first: &str, email: &str) -> i64 {
        users
            .create(&CreateUserInput {
                first_name: first.to_string(),
                last_name: "Tester".to_string(),
                email: email.to_string(),
                password_hash: "h".to_string(),
                subscription_tier_id: 1,
            })
            .await
            .unwrap()
            .id
    }

    fn new_sub(user_id: i64, tier_id: i64, days: i64) -> NewSubscription {
        let now = Utc::now();
        NewSubscription {
            user_id,
            tier_id,
            description: "Free Tier".to_string(),
            payment_method: "card".to_string(),
            amount: 0.0,
            start_date: now,
            end_date: now + Duration::days(days),
        }
    }

    #[tokio::test]
    async fn test_list_and_get_tiers() {
        let (subs, _) = setup().await;
        let tiers = subs.list_tiers().await.unwrap();
        assert_eq!(tiers.len(), 3);
        assert!(!tiers[0].features.is_empty());

        let pro = subs.get_tier_by_name("Pro").await.unwrap().unwrap();
        assert_eq!(pro.capacity_gb, 1000.0);
        assert_eq!(subs.get_tier(pro.id).await.unwrap().unwrap().name, "Pro");
        assert!(subs.get_tier(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_active_expires_old_and_moves_tier() {
        let (subs, users) = setup().await;
        let uid = user(&users, "Sam", "sam@example.com").await;

        let first = subs.create(&new_sub(uid, 1, 30)).await.unwrap();
        let second = subs.replace_active(&new_sub(uid, 3, 30)).await.unwrap();
        assert_ne!(first.id, second.id);

        let active = subs.active_for_user(uid).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.tier_id, 3);

        let history = subs.history(&SubscriptionHistoryFilter::default()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.iter().filter(|h| h.status == SubscriptionStatus::Active).count(),
            1
        );

        let stored = users.get_by_id(uid).await.unwrap().unwrap();
        assert_eq!(stored.subscription_tier_id, 3);
    }

    #[tokio::test]
    async fn test_history_search_and_range() {
        let (subs, users) = setup().await;
        let ana = user(&users, "Ana", "ana@example.com").await;
        let bob = user(&users, "Bob", "bob@example.com").await;
        subs.create(&new_sub(ana, 1, 30)).await.unwrap();
        subs.create(&new_sub(bob, 2, 30)).await.unwrap();

        let filtered = subs
            .history(&SubscriptionHistoryFilter {
                user_id: None,
                range: None,
                search: Some("aN".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].customer_name, "Ana Tester");
        assert_eq!(filtered[0].tier_name, "Basic");

        let now = Utc::now();
        let past = subs
            .history(&SubscriptionHistoryFilter {
                user_id: None,
                range: Some((now - Duration::days(10), now - Duration::days(5))),
                search: None,
            })
            .await
            .unwrap();
        assert!(past.is_empty());

        let own = subs
            .history(&SubscriptionHistoryFilter {
                user_id: Some(bob),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].customer_name, "Bob Tester");
    }

    #[tokio::test]
    async fn test_expire_ended() {
        let (subs, users) = setup().await;
        let uid = user(&users, "Eve", "eve@example.com").await;
        subs.create(&new_sub(uid, 1, -1)).await.unwrap();
        let other = user(&users, "Fay", "fay@example.com").await;
        subs.create(&new_sub(other, 1, 10)).await.unwrap();

        assert_eq!(subs.expire_ended(Utc::now()).await.unwrap(), 1);
        assert!(subs.active_for_user(uid).await.unwrap().is_none());
        assert!(subs.active_for_user(other).await.unwrap().is_some());
    }
}
