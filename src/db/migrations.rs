//! Embedded schema migrations
//!
//! Each [`Migration`] carries the DDL for both backends. Applied versions are
//! tracked in `_migrations`, so [`run_migrations`] is safe to call on every
//! startup.

use anyhow::{Context, Result};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::pool::{mysql_pool, sqlite_pool};
use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A schema change with SQL for both backends
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique, increasing version number
    pub version: i32,
    pub name: &'static str,
    pub up_sqlite: &'static str,
    pub up_mysql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_subscription_tiers",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS subscription_tiers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE,
                capacity_gb REAL NOT NULL CHECK (capacity_gb > 0),
                max_media_size_gb REAL NOT NULL CHECK (max_media_size_gb > 0),
                features TEXT NOT NULL DEFAULT '[]',
                price REAL NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Basic', 100, 0.1, '["Public and private albums","Images up to 100 MB"]', 0);
            INSERT OR IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Advanced', 50, 1, '["Restricted albums","Media up to 1 GB"]', 4.99);
            INSERT OR IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Pro', 1000, 5, '["Restricted albums","Media up to 5 GB","Priority support"]', 14.99);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS subscription_tiers (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE,
                capacity_gb DOUBLE NOT NULL,
                max_media_size_gb DOUBLE NOT NULL,
                features TEXT NOT NULL,
                price DOUBLE NOT NULL DEFAULT 0
            );
            INSERT IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Basic', 100, 0.1, '["Public and private albums","Images up to 100 MB"]', 0);
            INSERT IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Advanced', 50, 1, '["Restricted albums","Media up to 1 GB"]', 4.99);
            INSERT IGNORE INTO subscription_tiers (name, capacity_gb, max_media_size_gb, features, price)
            VALUES ('Pro', 1000, 5, '["Restricted albums","Media up to 5 GB","Priority support"]', 14.99);
        "#,
    },
    Migration {
        version: 2,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                full_name VARCHAR(100),
                user_name VARCHAR(30) UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                phone VARCHAR(20),
                bio TEXT,
                address VARCHAR(255),
                job_title VARCHAR(100),
                state VARCHAR(100),
                zip_code VARCHAR(20),
                city VARCHAR(100),
                company_name VARCHAR(100),
                profile_picture TEXT,
                tag_preferences TEXT NOT NULL DEFAULT '[]',
                social_media TEXT,
                subscription_tier_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                deactivated_until TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (subscription_tier_id) REFERENCES subscription_tiers(id)
            );
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
            CREATE TABLE IF NOT EXISTS account_configs (
                user_id INTEGER PRIMARY KEY,
                two_factor_enabled BOOLEAN NOT NULL DEFAULT 0,
                two_factor_method VARCHAR(20),
                totp_secret VARCHAR(128),
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                full_name VARCHAR(100),
                user_name VARCHAR(30) UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                phone VARCHAR(20),
                bio TEXT,
                address VARCHAR(255),
                job_title VARCHAR(100),
                state VARCHAR(100),
                zip_code VARCHAR(20),
                city VARCHAR(100),
                company_name VARCHAR(100),
                profile_picture TEXT,
                tag_preferences TEXT NOT NULL,
                social_media TEXT,
                subscription_tier_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                deactivated_until DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (subscription_tier_id) REFERENCES subscription_tiers(id)
            );
            CREATE TABLE IF NOT EXISTS account_configs (
                user_id BIGINT PRIMARY KEY,
                two_factor_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                two_factor_method VARCHAR(20),
                totp_secret VARCHAR(128),
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_user_subscriptions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS user_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                tier_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL,
                description VARCHAR(255) NOT NULL DEFAULT '',
                payment_method VARCHAR(50) NOT NULL DEFAULT '',
                amount REAL NOT NULL DEFAULT 0,
                start_date TIMESTAMP NOT NULL,
                end_date TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (tier_id) REFERENCES subscription_tiers(id)
            );
            CREATE INDEX IF NOT EXISTS idx_user_subscriptions_user ON user_subscriptions(user_id, status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS user_subscriptions (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                tier_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL,
                description VARCHAR(255) NOT NULL DEFAULT '',
                payment_method VARCHAR(50) NOT NULL DEFAULT '',
                amount DOUBLE NOT NULL DEFAULT 0,
                start_date DATETIME NOT NULL,
                end_date DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (tier_id) REFERENCES subscription_tiers(id)
            );
            CREATE INDEX idx_user_subscriptions_user ON user_subscriptions(user_id, status);
        "#,
    },
    Migration {
        version: 4,
        name: "create_access_tokens",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                ip_address VARCHAR(64) NOT NULL DEFAULT '',
                access_expires_at TIMESTAMP NOT NULL,
                refresh_expires_at TIMESTAMP NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_access_tokens_user ON access_tokens(user_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                ip_address VARCHAR(64) NOT NULL DEFAULT '',
                access_expires_at DATETIME NOT NULL,
                refresh_expires_at DATETIME NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_access_tokens_user ON access_tokens(user_id);
        "#,
    },
    Migration {
        version: 5,
        name: "create_follows",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS follows (
                follower_id INTEGER NOT NULL,
                following_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (follower_id, following_id),
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (following_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_follows_following ON follows(following_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS follows (
                follower_id BIGINT NOT NULL,
                following_id BIGINT NOT NULL,
                created_at DATETIME NOT NULL,
                PRIMARY KEY (follower_id, following_id),
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (following_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_follows_following ON follows(following_id);
        "#,
    },
    Migration {
        version: 6,
        name: "create_albums",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                cover_url TEXT,
                privacy VARCHAR(20) NOT NULL DEFAULT 'public',
                target_emails TEXT,
                like_count INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_albums_user ON albums(user_id);
            CREATE INDEX IF NOT EXISTS idx_albums_updated_at ON albums(updated_at);
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS album_tags (
                album_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (album_id, tag_id),
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS albums (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT NOT NULL,
                cover_url TEXT,
                privacy VARCHAR(20) NOT NULL DEFAULT 'public',
                target_emails TEXT,
                like_count BIGINT NOT NULL DEFAULT 0,
                view_count BIGINT NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_albums_user ON albums(user_id);
            CREATE INDEX idx_albums_updated_at ON albums(updated_at);
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS album_tags (
                album_id BIGINT NOT NULL,
                tag_id BIGINT NOT NULL,
                PRIMARY KEY (album_id, tag_id),
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 7,
        name: "create_album_media",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS album_media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                album_id INTEGER NOT NULL,
                kind VARCHAR(10) NOT NULL,
                url TEXT NOT NULL,
                thumbnail_url TEXT,
                description TEXT NOT NULL DEFAULT '',
                size_mb REAL NOT NULL DEFAULT 0,
                mime_type VARCHAR(100) NOT NULL,
                like_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_album_media_album ON album_media(album_id, kind);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS album_media (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                album_id BIGINT NOT NULL,
                kind VARCHAR(10) NOT NULL,
                url TEXT NOT NULL,
                thumbnail_url TEXT,
                description TEXT NOT NULL,
                size_mb DOUBLE NOT NULL DEFAULT 0,
                mime_type VARCHAR(100) NOT NULL,
                like_count BIGINT NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_album_media_album ON album_media(album_id, kind);
        "#,
    },
    Migration {
        version: 8,
        name: "create_likes",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS album_likes (
                album_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (album_id, user_id),
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS media_likes (
                media_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (media_id, user_id),
                FOREIGN KEY (media_id) REFERENCES album_media(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS album_likes (
                album_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                created_at DATETIME NOT NULL,
                PRIMARY KEY (album_id, user_id),
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS media_likes (
                media_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                created_at DATETIME NOT NULL,
                PRIMARY KEY (media_id, user_id),
                FOREIGN KEY (media_id) REFERENCES album_media(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 9,
        name: "create_album_comments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS album_comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                album_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_album_comments_album ON album_comments(album_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS album_comments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                album_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_album_comments_album ON album_comments(album_id);
        "#,
    },
    Migration {
        version: 10,
        name: "create_temp_media",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS temp_media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                ip_address VARCHAR(64) NOT NULL DEFAULT '',
                mime_type VARCHAR(100) NOT NULL,
                size_mb REAL NOT NULL DEFAULT 0,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_temp_media_expires ON temp_media(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS temp_media (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                url TEXT NOT NULL,
                ip_address VARCHAR(64) NOT NULL DEFAULT '',
                mime_type VARCHAR(100) NOT NULL,
                size_mb DOUBLE NOT NULL DEFAULT 0,
                expires_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX idx_temp_media_expires ON temp_media(expires_at);
        "#,
    },
];

/// Apply every migration not yet recorded, returning how many ran.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    ensure_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        tracing::info!("Applying migration {}: {}", migration.version, migration.name);
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("Schema is up to date");
    }

    Ok(count)
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    ensure_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count())
}

pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

async fn ensure_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            "CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL, applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        }
        DatabaseDriver::Mysql => {
            "CREATE TABLE IF NOT EXISTS _migrations (version INT PRIMARY KEY, name VARCHAR(255) NOT NULL, applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        }
    };
    pool.execute(sql).await?;
    Ok(())
}

async fn applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => applied_versions_sqlite(sqlite_pool(pool)?).await,
        DatabaseDriver::Mysql => applied_versions_mysql(mysql_pool(pool)?).await,
    }
}

async fn applied_versions_sqlite(pool: &SqlitePool) -> Result<Vec<i32>> {
    let rows = sqlx::query("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;
    Ok(rows.iter().map(|r| r.get::<i64, _>("version") as i32).collect())
}

async fn applied_versions_mysql(pool: &MySqlPool) -> Result<Vec<i32>> {
    let rows = sqlx::query("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;
    Ok(rows.iter().map(|r| r.get::<i32, _>("version")).collect())
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let pool = sqlite_pool(pool)?;
            for statement in split_sql_statements(migration.up_sqlite) {
                sqlx::query(statement)
                    .execute(pool)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(pool)
                .await?;
        }
        DatabaseDriver::Mysql => {
            let pool = mysql_pool(pool)?;
            for statement in split_sql_statements(migration.up_mysql) {
                sqlx::query(statement)
                    .execute(pool)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split a migration body on `;`, dropping blank and comment-only fragments.
///
/// Migration bodies never contain semicolons inside string literals.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !is_comment_only(s))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.unwrap();

        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());
        let count = run_migrations(&pool).await.unwrap();
        assert_eq!(count, MIGRATIONS.len());

        assert_eq!(run_migrations(&pool).await.unwrap(), 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tiers_are_seeded() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sqlite = sqlite_pool(&pool).unwrap();

        let rows = sqlx::query(
            "SELECT name, capacity_gb, max_media_size_gb FROM subscription_tiers ORDER BY id",
        )
        .fetch_all(sqlite)
        .await
        .unwrap();

        let tiers: Vec<(String, f64, f64)> = rows
            .iter()
            .map(|r| (r.get("name"), r.get("capacity_gb"), r.get("max_media_size_gb")))
            .collect();
        assert_eq!(
            tiers,
            vec![
                ("Basic".to_string(), 100.0, 0.1),
                ("Advanced".to_string(), 50.0, 1.0),
                ("Pro".to_string(), 1000.0, 5.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_album_delete_cascades_to_media() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sqlite = sqlite_pool(&pool).unwrap();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO users (first_name, last_name, email, password_hash, subscription_tier_id, created_at, updated_at) VALUES ('A', 'B', 'a@x.com', 'h', 1, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(sqlite)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO albums (user_id, title, created_at, updated_at) VALUES (1, 'Trip', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(sqlite)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO album_media (album_id, kind, url, mime_type, size_mb, created_at, updated_at) VALUES (1, 'image', 'u', 'image/png', 1.5, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(sqlite)
        .await
        .unwrap();

        sqlx::query("DELETE FROM albums WHERE id = 1")
            .execute(sqlite)
            .await
            .unwrap();

        let remaining: i64 = sqlx::query("SELECT COUNT(*) AS c FROM album_media")
            .fetch_one(sqlite)
            .await
            .unwrap()
            .get("c");
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_album_requires_existing_owner() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sqlite = sqlite_pool(&pool).unwrap();
        let now = chrono::Utc::now();

        let result = sqlx::query(
            "INSERT INTO albums (user_id, title, created_at, updated_at) VALUES (999, 'Orphan', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(sqlite)
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_get_migration() {
        assert_eq!(get_migration(1).map(|m| m.name), Some("create_subscription_tiers"));
        assert!(get_migration(999).is_none());
    }

    #[test]
    fn test_versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let statements = split_sql_statements("CREATE TABLE a (id INT);\n  -- note\n;CREATE TABLE b (id INT)");
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)"]);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- one\n  -- two"));
        assert!(!is_comment_only("-- one\nSELECT 1"));
    }
}
