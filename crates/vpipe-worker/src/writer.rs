//! Video record writer.

use std::sync::Arc;

use tracing::{debug, warn};

use vpipe_firestore::VideoRecordStore;
use vpipe_models::{VideoId, VideoRecord, VideoUpdate};

use crate::cache::{account_cache_key, video_cache_key, CacheInvalidator};
use crate::error::WorkerResult;

/// Applies one job's derived fields as a single merge and drops the cached
/// read models that depend on them.
#[derive(Clone)]
pub struct RecordWriter {
    records: Arc<dyn VideoRecordStore>,
    cache: Arc<dyn CacheInvalidator>,
}

impl RecordWriter {
    pub fn new(records: Arc<dyn VideoRecordStore>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { records, cache }
    }

    /// Merge `update` into the record.
    ///
    /// Returns `None` when the record no longer exists; nothing is written
    /// and nothing is invalidated in that case.
    pub async fn write(
        &self,
        video_id: &VideoId,
        update: &VideoUpdate,
    ) -> WorkerResult<Option<VideoRecord>> {
        let Some(record) = self.records.update(video_id, update).await? else {
            return Ok(None);
        };

        debug!(video_id = %video_id, fields = ?update.field_names(), "Recorded derived fields");
        self.invalidate_for(video_id, &record.owner_id).await;
        Ok(Some(record))
    }

    /// Drop the per-video and per-account entries.
    ///
    /// The record itself is already durable, so a failed invalidation is
    /// logged rather than failing the job.
    pub async fn invalidate_for(&self, video_id: &VideoId, owner_id: &str) {
        for key in [video_cache_key(video_id), account_cache_key(owner_id)] {
            if let Err(e) = self.cache.invalidate(&key).await {
                warn!(video_id = %video_id, key = %key, "Cache invalidation failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecordingCache;
    use vpipe_firestore::MemoryRecordStore;

    #[tokio::test]
    async fn test_write_invalidates_video_and_account() {
        let records = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(RecordingCache::new());
        records
            .insert(VideoRecord::new(VideoId::from("v1"), "acct", "v1.mp4", 10))
            .await;

        let writer = RecordWriter::new(records.clone(), cache.clone());
        let record = writer
            .write(&VideoId::from("v1"), &VideoUpdate::new().with_duration(4.5))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.duration_secs, Some(4.5));
        assert_eq!(
            cache.invalidated().await,
            vec!["video:v1".to_string(), "account:acct:videos".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_record_writes_nothing() {
        let records = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(RecordingCache::new());
        let writer = RecordWriter::new(records, cache.clone());

        let result = writer
            .write(&VideoId::from("gone"), &VideoUpdate::new().with_duration(1.0))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(cache.invalidated().await.is_empty());
    }
}
