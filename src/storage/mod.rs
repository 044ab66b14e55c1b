//! Durable, score-ordered job collections.
//!
//! A store holds three independent ordered sets (`pending`, `completed`,
//! `failed`) of serialized job records, each member scored by epoch
//! milliseconds. The pending set doubles as the wait queue; the other two are
//! the audit trail.

#[cfg(feature = "redis")]
pub mod redis;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported store backend: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Pending,
    Completed,
    Failed,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Pending, Collection::Completed, Collection::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Pending => "pending",
            Collection::Completed => "completed",
            Collection::Failed => "failed",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Collection::Pending),
            "completed" => Ok(Collection::Completed),
            "failed" => Ok(Collection::Failed),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts `member` at `score`, or moves it there if already present.
    async fn enqueue(&self, collection: Collection, member: &str, score: i64) -> Result<()>;

    /// Returns up to `limit` members with score <= `max_score`, lowest score
    /// first, without removing them.
    async fn pop_due(&self, collection: Collection, max_score: i64, limit: usize)
        -> Result<Vec<String>>;

    /// Removes `member`. Absent members are a no-op; the return value says
    /// whether this call was the one that removed it.
    async fn remove(&self, collection: Collection, member: &str) -> Result<bool>;

    async fn count(&self, collection: Collection) -> Result<u64>;

    /// Drops every member scored strictly below `cutoff_score`.
    async fn remove_older_than(&self, collection: Collection, cutoff_score: i64) -> Result<u64>;
}

/// Builds the store backend selected in the configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    match config {
        StoreConfig::Sqlite { url } if url == "sqlite::memory:" => {
            Ok(Arc::new(SqliteStore::in_memory().await?))
        }
        StoreConfig::Sqlite { url } => Ok(Arc::new(SqliteStore::new(url).await?)),
        #[cfg(feature = "redis")]
        StoreConfig::Redis { .. } => Ok(Arc::new(RedisStore::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        StoreConfig::Redis { .. } => Err(StorageError::Unsupported(
            "redis (crate built without the `redis` feature)".to_string(),
        )),
    }
}
