//! Connection pools for the two supported backends.
//!
//! Repositories hold a [`DynDatabasePool`] and pick the concrete pool with
//! [`sqlite_pool`] or [`mysql_pool`] after matching on [`DatabasePool::driver`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions},
    sqlite::{SqlitePool, SqlitePoolOptions},
};
use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseDriver};

/// Backend-neutral handle to a connection pool.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows, yielding the affected row count
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Round-trip a trivial query
    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn as_sqlite(&self) -> Option<&SqlitePool>;

    fn as_mysql(&self) -> Option<&MySqlPool>;
}

/// Shared pool handle passed to every repository
pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// Borrow the SQLite pool, failing if the handle wraps another backend.
pub fn sqlite_pool(pool: &DynDatabasePool) -> Result<&SqlitePool> {
    pool.as_sqlite()
        .ok_or_else(|| anyhow!("SQLite pool unavailable for driver {:?}", pool.driver()))
}

/// Borrow the MySQL pool, failing if the handle wraps another backend.
pub fn mysql_pool(pool: &DynDatabasePool) -> Result<&MySqlPool> {
    pool.as_mysql()
        .ok_or_else(|| anyhow!("MySQL pool unavailable for driver {:?}", pool.driver()))
}

pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (or create) a SQLite database.
    ///
    /// Accepts `:memory:`, a bare file path, or a `sqlite:` URL. Parent
    /// directories of file databases are created on demand and foreign keys
    /// are switched on so album deletes cascade to media, likes and comments.
    pub async fn new(url: &str) -> Result<Self> {
        let in_memory = url == ":memory:" || url.starts_with("sqlite::memory:");

        if !in_memory {
            let path = url.strip_prefix("sqlite:").unwrap_or(url);
            let path = path.split('?').next().unwrap_or(path);
            if let Some(dir) = std::path::Path::new(path).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir).with_context(|| {
                        format!("Failed to create database directory: {}", dir.display())
                    })?;
                }
            }
        }

        let connection_url = match url {
            ":memory:" => "sqlite::memory:".to_string(),
            u if u.starts_with("sqlite:") && u.contains('?') => u.to_string(),
            u if u.starts_with("sqlite:") => format!("{}?mode=rwc", u),
            u => format!("sqlite:{}?mode=rwc", u),
        };

        // A single connection keeps every handle on the same in-memory database.
        let max_connections = if in_memory { 1 } else { 20 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&connection_url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database: {}", url))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .context("Failed to enable foreign keys")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let done = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("SQLite ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Sqlite
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        None
    }
}

pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    /// Connect to MySQL; the `mysql://` scheme is added when missing.
    pub async fn new(url: &str) -> Result<Self> {
        let connection_url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(30)
            .connect(&connection_url)
            .await
            .with_context(|| format!("Failed to connect to MySQL database: {}", url))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let done = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("MySQL ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Mysql
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        None
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        Some(&self.pool)
    }
}

/// Build the pool selected by `config.driver`.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    let pool: DynDatabasePool = match config.driver {
        DatabaseDriver::Sqlite => Arc::new(SqliteDatabase::new(&config.url).await?),
        DatabaseDriver::Mysql => Arc::new(MysqlDatabase::new(&config.url).await?),
    };
    Ok(pool)
}

/// In-memory SQLite pool for tests
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    create_pool(&DatabaseConfig {
        driver: DatabaseDriver::Sqlite,
        url: ":memory:".to_string(),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_is_sqlite() {
        let pool = create_test_pool().await.unwrap();
        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(sqlite_pool(&pool).is_ok());
        assert!(mysql_pool(&pool).is_err());
        pool.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pool_shares_state_across_queries() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE probe (id INTEGER PRIMARY KEY, label TEXT)")
            .await
            .unwrap();
        let inserted = pool
            .execute("INSERT INTO probe (label) VALUES ('a'), ('b')")
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let deleted = pool.execute("DELETE FROM probe").await.unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_file_pool_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("nested").join("albums.db");

        let pool = create_pool(&DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: db_path.to_string_lossy().to_string(),
        })
        .await
        .unwrap();

        pool.ping().await.unwrap();
        assert!(db_path.exists());
        pool.close().await;
    }

    #[tokio::test]
    #[ignore = "Requires MySQL server"]
    async fn test_mysql_pool() {
        let url = std::env::var("MYSQL_TEST_URL")
            .unwrap_or_else(|_| "mysql://root@localhost/albumvault_test".to_string());

        let pool = create_pool(&DatabaseConfig {
            driver: DatabaseDriver::Mysql,
            url,
        })
        .await
        .unwrap();

        assert_eq!(pool.driver(), DatabaseDriver::Mysql);
        assert!(mysql_pool(&pool).is_ok());
        pool.ping().await.unwrap();
    }
}
