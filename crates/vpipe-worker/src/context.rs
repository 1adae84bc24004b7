//! Collaborators shared by every job a worker runs.

use std::sync::Arc;

use tracing::info;

use vpipe_firestore::{
    AccountRepository, AccountStore, FirestoreClient, VideoRecordStore, VideoRepository,
};
use vpipe_queue::{JobDispatch, JobQueue};
use vpipe_storage::{ObjectStore, S3Client};

use crate::cache::{CacheInvalidator, RedisCache};
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::toolkit::{FfmpegToolkit, MediaToolkit};

/// The ports the orchestrator and reaper are parameterized by.
///
/// Production wires S3, Firestore, Redis and ffmpeg; tests hand in the
/// in-memory implementations.
#[derive(Clone)]
pub struct PipelinePorts {
    pub store: Arc<dyn ObjectStore>,
    pub records: Arc<dyn VideoRecordStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub dispatch: Arc<dyn JobDispatch>,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub cache: Arc<dyn CacheInvalidator>,
}

impl PipelinePorts {
    /// Build the production ports from the environment.
    ///
    /// `queue` doubles as the dispatcher for retries, escalations and
    /// deferred cleanup.
    pub async fn from_env(config: &WorkerConfig, queue: Arc<JobQueue>) -> WorkerResult<Self> {
        let store = S3Client::from_env()?;
        store.check_connectivity().await?;

        let firestore = FirestoreClient::from_env().await?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        info!("Pipeline ports initialized");
        Ok(Self {
            store: Arc::new(store),
            records: Arc::new(VideoRepository::new(firestore.clone())),
            accounts: Arc::new(AccountRepository::new(firestore)),
            dispatch: queue,
            toolkit: Arc::new(FfmpegToolkit::new(config.transcode_timeout)),
            cache: Arc::new(RedisCache::new(&redis_url)?),
        })
    }
}
