//! # Relational Storage
//!
//! SQLite-backed persistence for credentials and the statistics rollup
//! tables, behind a small async pool. The pool is sized small and warms a
//! minimum number of connections eagerly so the first request does not pay
//! connection setup.
//!
//! Schema creation is idempotent (`CREATE TABLE IF NOT EXISTS`) so the
//! service runs against an empty database file; anything beyond that is
//! the job of external migration tooling.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Database error types
#[derive(Debug, Error)]
pub enum DbError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Bad DSN
    #[error("Database configuration error: {0}")]
    Config(String),
}

/// Database result alias
pub type Result<T> = std::result::Result<T, DbError>;

/// Connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect, apply pragmas, and bootstrap the schema.
    pub async fn connect(dsn: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| DbError::Config(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// An in-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1, 1).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness check for the health endpoint.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                ip TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS request_stats_daily (
                date TEXT PRIMARY KEY,
                total_requests INTEGER NOT NULL DEFAULT 0,
                filtered_requests INTEGER NOT NULL DEFAULT 0,
                blocked_requests INTEGER NOT NULL DEFAULT 0,
                cached_requests INTEGER NOT NULL DEFAULT 0,
                avg_response_time_ms REAL NOT NULL DEFAULT 0,
                p95_response_time_ms REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS api_performance_hourly (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                api_type TEXT NOT NULL,
                total_calls INTEGER NOT NULL DEFAULT 0,
                error_calls INTEGER NOT NULL DEFAULT 0,
                avg_response_time_ms REAL NOT NULL DEFAULT 0,
                UNIQUE(timestamp, api_type)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS content_flags_daily (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                flag_name TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(date, flag_name)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS user_activity_daily (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                user_id TEXT NOT NULL,
                request_count INTEGER NOT NULL DEFAULT 0,
                blocked_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(date, user_id)
            )
            ",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_bootstrap() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(db.health_check().await);

        // Schema bootstrap is idempotent.
        db.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_tables_exist() {
        let db = Database::connect_in_memory().await.unwrap();

        for table in [
            "credentials",
            "request_stats_daily",
            "api_performance_hourly",
            "content_flags_daily",
            "user_activity_daily",
        ] {
            let count: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(count.0, 1, "missing table {}", table);
        }
    }
}
