/// Persistent state for gfs-backup.
///
/// A single SQLite database holds:
/// - The key-value parameter store (vault key)
/// - Backup configurations
/// - The append-only execution log
pub mod models;
pub mod repository;

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// Key-value parameter storage used by the credential vault.
#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn get_param(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` unless `key` already has one. Returns whether this call
    /// wrote it.
    async fn insert_param_if_absent(&self, key: &str, value: &str) -> Result<bool>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) a SQLite database and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// A private in-memory database. Pinned to one connection that never
    /// expires, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ParamStore for Database {
    async fn get_param(&self, key: &str) -> Result<Option<String>> {
        repository::get_param(&self.pool, key).await
    }

    async fn insert_param_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        repository::insert_param_if_absent(&self.pool, key, value).await
    }
}
