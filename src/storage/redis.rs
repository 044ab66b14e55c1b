use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::{Collection, JobStore, Result, StorageError};
use crate::config::StoreConfig;

/// One Redis sorted set per collection, keyed `<prefix>:<collection>`.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let StoreConfig::Redis {
            host,
            port,
            password,
            db,
            key_prefix,
        } = config
        else {
            return Err(StorageError::Unsupported(
                "RedisStore needs a redis store config".to_string(),
            ));
        };

        let client = redis::Client::open(connection_url(host, *port, password.as_deref(), *db))?;
        let connection = ConnectionManager::new(client).await?;
        info!(host = %host, port = port, db = db, "Connected to Redis job store");

        Ok(Self::from_connection(connection, key_prefix.clone()))
    }

    pub fn from_connection(connection: ConnectionManager, key_prefix: String) -> Self {
        Self {
            connection,
            key_prefix,
        }
    }

    fn key(&self, collection: Collection) -> String {
        format!("{}:{}", self.key_prefix, collection.as_str())
    }
}

fn connection_url(host: &str, port: u16, password: Option<&str>, db: i64) -> String {
    match password {
        Some(password) if !password.is_empty() => format!(
            "redis://:{}@{}:{}/{}",
            urlencoding::encode(password),
            host,
            port,
            db
        ),
        _ => format!("redis://{}:{}/{}", host, port, db),
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn enqueue(&self, collection: Collection, member: &str, score: i64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.zadd(self.key(collection), member, score).await?;
        Ok(())
    }

    async fn pop_due(
        &self,
        collection: Collection,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        // ZRANGEBYSCORE takes LIMIT count as a signed integer.
        let count = isize::try_from(limit).unwrap_or(isize::MAX);
        let members: Vec<String> = conn
            .zrangebyscore_limit(self.key(collection), "-inf", max_score, 0, count)
            .await?;
        Ok(members)
    }

    async fn remove(&self, collection: Collection, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(self.key(collection), member).await?;
        Ok(removed > 0)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.zcard(self.key(collection)).await?;
        Ok(count)
    }

    async fn remove_older_than(&self, collection: Collection, cutoff_score: i64) -> Result<u64> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn
            .zrembyscore(self.key(collection), "-inf", format!("({}", cutoff_score))
            .await?;
        Ok(removed)
    }
}
