//! Read-model cache invalidation port.

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use vpipe_models::VideoId;

use crate::error::{WorkerError, WorkerResult};

/// Cached read model for one video.
pub fn video_cache_key(video_id: &VideoId) -> String {
    format!("video:{}", video_id)
}

/// Cached video listing of one account.
pub fn account_cache_key(account_id: &str) -> String {
    format!("account:{}:videos", account_id)
}

/// Drops cached read models after the pipeline changes a record.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, key: &str) -> WorkerResult<()>;
}

/// Invalidation by `DEL` against the Redis instance the API caches in.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> WorkerResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl CacheInvalidator for RedisCache {
    async fn invalidate(&self, key: &str) -> WorkerResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WorkerError::Cache(format!("{}: {}", key, e)))?;
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| WorkerError::Cache(format!("{}: {}", key, e)))?;
        debug!(key, removed, "Invalidated cache entry");
        Ok(())
    }
}

/// Remembers invalidated keys; for tests and local runs.
#[derive(Debug, Default)]
pub struct RecordingCache {
    keys: Mutex<Vec<String>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn invalidated(&self) -> Vec<String> {
        self.keys.lock().await.clone()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingCache {
    async fn invalidate(&self, key: &str) -> WorkerResult<()> {
        self.keys.lock().await.push(key.to_string());
        Ok(())
    }
}
