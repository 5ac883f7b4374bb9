//! Database layer
//!
//! SQLite is the default backend; MySQL is selected through
//! `database.driver`. Both sit behind the [`DatabasePool`] trait so the
//! repositories can dispatch on [`DatabasePool::driver`] without the rest of
//! the application knowing which one is live.
//!
//! ```ignore
//! use albumvault::config::DatabaseConfig;
//! use albumvault::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool};
