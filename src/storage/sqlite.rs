use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{Collection, JobStore, Result};

/// Ordered-set store on a single SQLite table.
///
/// Members within a collection are unique; ties on score are broken by the
/// member text, the same ordering a Redis sorted set gives.
pub struct SqliteStore {
    pub pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let storage = Self { pool };
        storage.configure().await?;
        storage.migrate().await?;
        Ok(storage)
    }

    /// A private in-memory database. Pinned to one connection, since every
    /// SQLite connection to `:memory:` opens its own database.
    pub async fn in_memory() -> std::result::Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn configure(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;

        sqlx::query("PRAGMA busy_timeout=5000;")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn migrate(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_sets (
                collection TEXT NOT NULL,
                member TEXT NOT NULL,
                score INTEGER NOT NULL,
                PRIMARY KEY (collection, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_sets_score ON job_sets(collection, score, member)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn enqueue(&self, collection: Collection, member: &str, score: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_sets (collection, member, score)
            VALUES (?, ?, ?)
            ON CONFLICT(collection, member) DO UPDATE SET
                score = excluded.score
            "#,
        )
        .bind(collection.as_str())
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pop_due(
        &self,
        collection: Collection,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let members = sqlx::query_scalar::<_, String>(
            r#"
            SELECT member FROM job_sets
            WHERE collection = ? AND score <= ?
            ORDER BY score ASC, member ASC
            LIMIT ?
            "#,
        )
        .bind(collection.as_str())
        .bind(max_score)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn remove(&self, collection: Collection, member: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_sets WHERE collection = ? AND member = ?")
            .bind(collection.as_str())
            .bind(member)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_sets WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn remove_older_than(&self, collection: Collection, cutoff_score: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_sets WHERE collection = ? AND score < ?")
            .bind(collection.as_str())
            .bind(cutoff_score)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
