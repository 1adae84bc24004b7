//! Deletion reaper and deferred artifact cleanup.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use vpipe_firestore::{AccountStore, VideoRecordStore};
use vpipe_models::encoding::LADDER_HEIGHTS;
use vpipe_models::keys::{rung_key, storyboard_key, thumbnail_large_key, thumbnail_small_key};
use vpipe_models::VideoRecord;
use vpipe_queue::{JobDispatch, PurgeArtifactsJob, QueueJob, ReapReason, ReapVideoJob};
use vpipe_storage::{Bucket, ObjectStore};

use crate::context::PipelinePorts;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::writer::RecordWriter;

/// What a reap did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    Reaped {
        versions_deleted: u32,
        released_bytes: u64,
    },
    /// Expiry job arrived before the scheduled deletion time.
    NotDue,
    /// Expired record removed but the account release failed; a snapshot
    /// reap was enqueued to finish it.
    HandedOff,
    /// No record and no snapshot; nothing to reap.
    Missing,
}

pub struct Reaper {
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn VideoRecordStore>,
    accounts: Arc<dyn AccountStore>,
    dispatch: Arc<dyn JobDispatch>,
    writer: RecordWriter,
}

impl Reaper {
    pub fn new(ports: &PipelinePorts) -> Self {
        Self {
            store: Arc::clone(&ports.store),
            records: Arc::clone(&ports.records),
            accounts: Arc::clone(&ports.accounts),
            dispatch: Arc::clone(&ports.dispatch),
            writer: RecordWriter::new(Arc::clone(&ports.records), Arc::clone(&ports.cache)),
        }
    }

    /// Remove every version of every object a video owns and give its bytes
    /// back to the account.
    ///
    /// Object deletion goes first and tolerates missing keys, so a retried
    /// reap repeats it harmlessly. The storage release is the last fallible
    /// step, so it happens at most once: an expired record is deleted before
    /// it, and if the release then fails the work moves to a snapshot reap
    /// since a retry of this job would find no record.
    pub async fn reap(&self, job: &ReapVideoJob) -> WorkerResult<ReapOutcome> {
        let logger = JobLogger::new(&job.job_id, &job.video_id, "reap_video", job.attempt);
        logger.log_start(job.reason.as_str());

        let record = match (&job.reason, &job.snapshot) {
            (ReapReason::Deleted, Some(snapshot)) => snapshot.clone(),
            _ => match self.records.read(&job.video_id).await? {
                Some(record) => record,
                None => {
                    logger.log_warning("no record or snapshot, nothing to reap");
                    return Ok(ReapOutcome::Missing);
                }
            },
        };

        if job.reason == ReapReason::Expired && !record.is_due_for_deletion(Utc::now()) {
            logger.log_progress("record not due for deletion yet");
            return Ok(ReapOutcome::NotDue);
        }

        let video_keys = video_keys(&record);
        let image_keys = image_keys(&record);
        let versions_deleted = self.store.delete(Bucket::Videos, &video_keys, true).await?
            + self.store.delete(Bucket::Thumbnails, &image_keys, true).await?;
        debug!(
            video_id = %record.id,
            versions_deleted,
            "Deleted object versions"
        );

        if job.reason == ReapReason::Expired {
            self.records.delete(&record.id).await?;
        }

        let released = match self
            .accounts
            .release_storage(&record.owner_id, record.file_size_bytes)
            .await
        {
            Ok(released) => released,
            Err(e) if job.reason == ReapReason::Expired => {
                warn!(
                    video_id = %record.id,
                    error = %e,
                    "Storage release failed after record delete, handing off"
                );
                let video_id = record.id.clone();
                let owner_id = record.owner_id.clone();
                self.dispatch
                    .enqueue(QueueJob::from(ReapVideoJob::deleted(record)))
                    .await?;
                self.writer.invalidate_for(&video_id, &owner_id).await;
                return Ok(ReapOutcome::HandedOff);
            }
            Err(e) => return Err(e.into()),
        };

        match released {
            Some(usage) => logger.log_progress(&format!(
                "released {} bytes, account now at {}",
                record.file_size_bytes, usage.storage_used_bytes
            )),
            None => logger.log_warning(&format!("account {} not found", record.owner_id)),
        }

        self.writer.invalidate_for(&record.id, &record.owner_id).await;

        logger.log_completion(&format!("{} object versions deleted", versions_deleted));
        Ok(ReapOutcome::Reaped {
            versions_deleted,
            released_bytes: record.file_size_bytes,
        })
    }

    /// Delete rungs a re-run dropped, unless the record references them again.
    pub async fn purge(&self, job: &PurgeArtifactsJob) -> WorkerResult<u32> {
        let record = self.records.read(&job.video_id).await?;
        let keys: Vec<String> = job
            .keys
            .iter()
            .filter(|key| !record.as_ref().is_some_and(|r| r.references_key(key)))
            .cloned()
            .collect();

        if keys.is_empty() {
            debug!(video_id = %job.video_id, "All purge keys referenced again");
            return Ok(0);
        }

        let deleted = self.store.delete(Bucket::Videos, &keys, true).await?;
        info!(
            video_id = %job.video_id,
            keys = keys.len(),
            deleted,
            "Purged dropped rungs"
        );
        Ok(deleted)
    }
}

/// Native file, listed sources and every rung key the ladder could have
/// written, including uploads an aborted attempt never recorded.
fn video_keys(record: &VideoRecord) -> Vec<String> {
    let mut keys = BTreeSet::new();
    keys.insert(record.native_key.clone());
    keys.extend(record.sources.iter().map(|s| s.key.clone()));
    keys.extend(
        LADDER_HEIGHTS
            .iter()
            .map(|h| rung_key(&record.native_key, *h)),
    );
    keys.into_iter().collect()
}

fn image_keys(record: &VideoRecord) -> Vec<String> {
    let mut keys = BTreeSet::new();
    keys.extend(record.thumbnail_small_key.clone());
    keys.extend(record.thumbnail_large_key.clone());
    keys.insert(thumbnail_small_key(&record.native_key));
    keys.insert(thumbnail_large_key(&record.native_key));
    keys.insert(storyboard_key(&record.native_key));
    keys.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::VideoId;

    #[test]
    fn test_keys_cover_derived_artifacts() {
        let record = VideoRecord::new(VideoId::from("v1"), "acct", "u/v1.mp4", 10);

        let videos = video_keys(&record);
        assert!(videos.contains(&"u/v1.mp4".to_string()));
        assert!(videos.contains(&"u/v1.mp4-480p.mp4".to_string()));
        assert_eq!(videos.len(), 1 + LADDER_HEIGHTS.len());

        let images = image_keys(&record);
        assert_eq!(
            images,
            vec![
                "u/v1.mp4-large.jpg".to_string(),
                "u/v1.mp4-small.jpg".to_string(),
                "u/v1.mp4-storyboard.jpg".to_string(),
            ]
        );
    }
}
