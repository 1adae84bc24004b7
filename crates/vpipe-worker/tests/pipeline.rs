//! End-to-end runs of the orchestrator, reaper and job runner against the
//! in-memory ports and a scripted media toolkit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vpipe_firestore::{
    AccountStore, FirestoreError, FirestoreResult, MemoryAccountStore, MemoryRecordStore,
    VideoRecordStore,
};
use vpipe_media::{MediaError, MediaProbe, MediaResult, Rung, StoryboardSprite, Thumbnails};
use vpipe_models::{
    AccountUsage, EncodingConfig, ExecutionProfile, PlanTier, ProcessingStep, Storyboard, VideoId,
    VideoRecord, VideoUpdate,
};
use vpipe_queue::{MemoryDispatch, ProcessVideoJob, QueueJob, ReapReason, ReapVideoJob};
use vpipe_storage::{Bucket, MemoryObjectStore, ObjectStore};
use vpipe_worker::{
    Disposition, JobOutcome, JobRunner, MediaToolkit, Pipeline, PipelinePorts, ReapOutcome,
    Reaper, RecordingCache, WorkerConfig,
};

const NATIVE_KEY: &str = "uploads/v1.mp4";
const OWNER: &str = "acct-1";
const CLEANUP_DELAY: Duration = Duration::from_secs(3600);

fn unavailable() -> FirestoreError {
    FirestoreError::Http {
        status: 503,
        message: "unavailable".to_string(),
    }
}

/// Record store whose first delete fails with a transient error.
struct FlakyDeleteRecords {
    inner: Arc<MemoryRecordStore>,
    failed: AtomicBool,
}

#[async_trait]
impl VideoRecordStore for FlakyDeleteRecords {
    async fn read(&self, id: &VideoId) -> FirestoreResult<Option<VideoRecord>> {
        self.inner.read(id).await
    }

    async fn update(
        &self,
        id: &VideoId,
        update: &VideoUpdate,
    ) -> FirestoreResult<Option<VideoRecord>> {
        self.inner.update(id, update).await
    }

    async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.delete(id).await
    }
}

/// Account store whose first release fails with a transient error.
struct FlakyReleaseAccounts {
    inner: Arc<MemoryAccountStore>,
    failed: AtomicBool,
}

#[async_trait]
impl AccountStore for FlakyReleaseAccounts {
    async fn tier(&self, account_id: &str) -> FirestoreResult<PlanTier> {
        self.inner.tier(account_id).await
    }

    async fn release_storage(
        &self,
        account_id: &str,
        bytes: u64,
    ) -> FirestoreResult<Option<AccountUsage>> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.release_storage(account_id, bytes).await
    }
}

/// Toolkit whose results are fixed up front.
#[derive(Default)]
struct ScriptedToolkit {
    probe: MediaProbe,
    bitrates: HashMap<u32, u64>,
    fail_storyboard: bool,
    exhaust_on_transcode: bool,
    transcoded: Mutex<Vec<u32>>,
    storyboard_durations: Mutex<Vec<Option<f64>>>,
}

impl ScriptedToolkit {
    fn hd() -> Self {
        Self {
            probe: MediaProbe {
                mime_type: Some("video/mp4".to_string()),
                width: Some(1920),
                height: Some(1080),
                duration_secs: Some(42.0),
                frame_rate: Some(30.0),
                bitrate: Some(8_000_000),
            },
            bitrates: HashMap::from([(720, 2_500_000), (480, 1_000_000)]),
            ..Default::default()
        }
    }

    fn with_bitrate(mut self, height: u32, bps: u64) -> Self {
        self.bitrates.insert(height, bps);
        self
    }

    fn failing_storyboard(mut self) -> Self {
        self.fail_storyboard = true;
        self
    }

    fn exhausting_transcode(mut self) -> Self {
        self.exhaust_on_transcode = true;
        self
    }

    fn transcoded_heights(&self) -> Vec<u32> {
        self.transcoded.lock().unwrap().clone()
    }

    fn storyboard_durations(&self) -> Vec<Option<f64>> {
        self.storyboard_durations.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaToolkit for ScriptedToolkit {
    async fn probe(&self, _video: &Path) -> MediaResult<MediaProbe> {
        Ok(self.probe.clone())
    }

    async fn render_posters(&self, _video: &Path, _scratch: &Path) -> MediaResult<Thumbnails> {
        Ok(Thumbnails {
            small: b"small-poster".to_vec(),
            large: b"large-poster".to_vec(),
            is_fallback: false,
        })
    }

    async fn build_storyboard(
        &self,
        video: &Path,
        _scratch: &Path,
        duration_secs: Option<f64>,
    ) -> MediaResult<StoryboardSprite> {
        self.storyboard_durations.lock().unwrap().push(duration_secs);
        if self.fail_storyboard {
            return Err(MediaError::NoFrames(video.to_path_buf()));
        }
        Ok(StoryboardSprite {
            image: b"sprite".to_vec(),
            manifest: Storyboard::vertical(160, 90, 3, 1.0),
        })
    }

    async fn transcode(
        &self,
        _input: &Path,
        output: &Path,
        rung: Rung,
        _encoding: &EncodingConfig,
    ) -> MediaResult<Option<u64>> {
        if self.exhaust_on_transcode {
            return Err(MediaError::ResourceExhausted("ffmpeg killed by SIGKILL".into()));
        }
        self.transcoded.lock().unwrap().push(rung.height);
        tokio::fs::write(output, format!("rung-{}", rung.height)).await?;
        Ok(self.bitrates.get(&rung.height).copied())
    }
}

struct Harness {
    store: Arc<MemoryObjectStore>,
    records: Arc<MemoryRecordStore>,
    accounts: Arc<MemoryAccountStore>,
    dispatch: Arc<MemoryDispatch>,
    toolkit: Arc<ScriptedToolkit>,
    cache: Arc<RecordingCache>,
    work_root: TempDir,
}

impl Harness {
    async fn new(toolkit: ScriptedToolkit, tier: PlanTier) -> Self {
        let harness = Self {
            store: Arc::new(MemoryObjectStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
            dispatch: Arc::new(MemoryDispatch::new()),
            toolkit: Arc::new(toolkit),
            cache: Arc::new(RecordingCache::new()),
            work_root: tempfile::tempdir().unwrap(),
        };

        harness
            .store
            .seed(Bucket::Videos, NATIVE_KEY, b"native-bytes".to_vec())
            .await;
        harness
            .accounts
            .insert(AccountUsage::new(OWNER, tier, 10_000))
            .await;
        harness.records.insert(record()).await;
        harness
    }

    fn ports(&self) -> PipelinePorts {
        PipelinePorts {
            store: self.store.clone(),
            records: self.records.clone(),
            accounts: self.accounts.clone(),
            dispatch: self.dispatch.clone(),
            toolkit: self.toolkit.clone(),
            cache: self.cache.clone(),
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(&self.ports(), self.work_root.path(), CLEANUP_DELAY)
    }

    fn runner(&self) -> JobRunner {
        let config = WorkerConfig {
            work_dir: self.work_root.path().to_path_buf(),
            ..Default::default()
        };
        JobRunner::new(&self.ports(), config)
    }

    async fn current(&self) -> VideoRecord {
        self.records.get(&video_id()).await.unwrap()
    }

    /// Nothing an attempt leaves behind survives it.
    fn assert_work_dir_reclaimed(&self) {
        let leftovers = std::fs::read_dir(self.work_root.path()).unwrap().count();
        assert_eq!(leftovers, 0, "work dir not reclaimed");
    }
}

fn video_id() -> VideoId {
    VideoId::from("v1")
}

fn record() -> VideoRecord {
    VideoRecord::new(video_id(), OWNER, NATIVE_KEY, 1_000)
}

fn job(steps: &[ProcessingStep]) -> ProcessVideoJob {
    ProcessVideoJob::new(video_id(), steps.iter().copied())
}

#[tokio::test]
async fn test_premium_1080p_builds_720_and_480() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;

    let outcome = h
        .pipeline()
        .process(&job(&[
            ProcessingStep::Thumbnails,
            ProcessingStep::Duration,
            ProcessingStep::Transcode,
        ]))
        .await
        .unwrap();

    let JobOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert!(result.success);
    assert!(result.failed_steps.is_empty());

    let record = h.current().await;
    let heights: Vec<Option<u32>> = record.sources.iter().map(|s| s.height).collect();
    assert_eq!(heights, vec![None, Some(720), Some(480)]);
    assert!(record.sources[0].is_native);
    assert_eq!(record.sources[1].key, "uploads/v1.mp4-720p.mp4");
    assert_eq!(record.sources[1].width, Some(1280));
    assert_eq!(record.sources[2].bitrate, Some(1_000_000));
    assert_eq!(record.thumbnail_small_key.as_deref(), Some("uploads/v1.mp4-small.jpg"));
    assert_eq!(record.thumbnail_large_key.as_deref(), Some("uploads/v1.mp4-large.jpg"));
    assert_eq!(record.duration_secs, Some(42.0));
    assert!(record.processing_complete);

    assert_eq!(h.toolkit.transcoded_heights(), vec![720, 480]);
    assert!(h.store.get(Bucket::Videos, "uploads/v1.mp4-480p.mp4").await.is_some());
    assert!(h.store.get(Bucket::Thumbnails, "uploads/v1.mp4-large.jpg").await.is_some());

    let invalidated = h.cache.invalidated().await;
    assert!(invalidated.contains(&"video:v1".to_string()));
    assert!(invalidated.contains(&"account:acct-1:videos".to_string()));

    assert_eq!(h.records.applied_updates().await.len(), 1);
    h.assert_work_dir_reclaimed();
}

#[tokio::test]
async fn test_low_bitrate_rung_ends_ladder() {
    let toolkit = ScriptedToolkit::hd().with_bitrate(720, 400_000);
    let h = Harness::new(toolkit, PlanTier::Pro).await;

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Transcode]))
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Completed(ref r) if r.success));
    assert_eq!(h.toolkit.transcoded_heights(), vec![720]);
    assert_eq!(h.current().await.sources.len(), 2);
}

#[tokio::test]
async fn test_free_tier_keeps_only_native() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;

    let outcome = h
        .pipeline()
        .process(&ProcessVideoJob::all_steps(video_id()))
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Completed(ref r) if r.success));
    assert!(h.toolkit.transcoded_heights().is_empty());

    let record = h.current().await;
    assert_eq!(record.sources.len(), 1);
    assert!(record.sources[0].is_native);
    assert_eq!(record.file_size_bytes, b"native-bytes".len() as u64);
    assert!(record.storyboard.is_some());
    assert_eq!(h.toolkit.storyboard_durations(), vec![Some(42.0)]);
}

#[tokio::test]
async fn test_forced_transcode_on_free_tier() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;

    h.pipeline()
        .process(&job(&[ProcessingStep::Transcode]).with_force_transcode(true))
        .await
        .unwrap();

    assert_eq!(h.toolkit.transcoded_heights(), vec![720, 480]);
}

#[tokio::test]
async fn test_duration_only_touches_duration() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    let mut existing = record().with_title("Launch demo");
    existing.processing_complete = true;
    h.records.insert(existing.clone()).await;

    h.pipeline()
        .process(&job(&[ProcessingStep::Duration]))
        .await
        .unwrap();

    let updates = h.records.applied_updates().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.field_names(), vec!["duration_secs"]);

    let record = h.current().await;
    assert_eq!(record.duration_secs, Some(42.0));
    assert_eq!(record.title, "Launch demo");
    assert_eq!(record.sources, existing.sources);
    assert_eq!(record.thumbnail_small_key, None);
    assert_eq!(h.store.publish_count(), 0);
}

#[tokio::test]
async fn test_deleted_mid_run_writes_nothing() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    h.records.vanish_after_checks(&video_id(), 0).await;

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Thumbnails, ProcessingStep::Transcode]))
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Aborted);
    assert_eq!(h.store.publish_count(), 0);
    assert!(h.records.applied_updates().await.is_empty());
    assert!(h.cache.invalidated().await.is_empty());
    // The in-flight rung finishes; nothing after it starts.
    assert_eq!(h.toolkit.transcoded_heights(), vec![720]);
    h.assert_work_dir_reclaimed();
}

#[tokio::test]
async fn test_missing_record_aborts() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    let outcome = h
        .pipeline()
        .process(&ProcessVideoJob::all_steps(VideoId::from("unknown")))
        .await
        .unwrap();

    assert!(outcome.is_aborted());
    assert_eq!(h.store.publish_count(), 0);
}

#[tokio::test]
async fn test_storyboard_failure_is_partial() {
    let h = Harness::new(ScriptedToolkit::hd().failing_storyboard(), PlanTier::Premium).await;

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Thumbnails, ProcessingStep::Storyboard]))
        .await
        .unwrap();

    let JobOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert!(!result.success);
    assert_eq!(result.failed_steps, vec![ProcessingStep::Storyboard]);

    let record = h.current().await;
    assert!(record.thumbnail_small_key.is_some());
    assert!(record.storyboard.is_none());
    assert!(record.processing_complete);
}

#[tokio::test]
async fn test_posters_recorded_together_or_not_at_all() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    h.store.fail_publishes_to("uploads/v1.mp4-large.jpg").await;

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Thumbnails, ProcessingStep::Duration]))
        .await
        .unwrap();

    let JobOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.failed_steps, vec![ProcessingStep::Thumbnails]);

    let record = h.current().await;
    assert_eq!(record.thumbnail_small_key, None);
    assert_eq!(record.thumbnail_large_key, None);
    assert_eq!(record.duration_secs, Some(42.0));
    assert!(h.store.get(Bucket::Thumbnails, "uploads/v1.mp4-small.jpg").await.is_none());
}

#[tokio::test]
async fn test_failed_poster_rollback_still_fails_thumbnails_only() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    h.store.fail_publishes_to("uploads/v1.mp4-large.jpg").await;
    h.store.fail_deletes_to("uploads/v1.mp4-small.jpg").await;

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Thumbnails, ProcessingStep::Duration]))
        .await
        .unwrap();

    let JobOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.failed_steps, vec![ProcessingStep::Thumbnails]);

    let record = h.current().await;
    assert_eq!(record.thumbnail_small_key, None);
    assert_eq!(record.thumbnail_large_key, None);
    assert_eq!(record.duration_secs, Some(42.0));
    // Orphaned, but never referenced by the record.
    assert!(h.store.get(Bucket::Thumbnails, "uploads/v1.mp4-small.jpg").await.is_some());
}

#[tokio::test]
async fn test_missing_native_fails_every_step() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    tokio_test::assert_ok!(
        h.store
            .delete(Bucket::Videos, &[NATIVE_KEY.to_string()], true)
            .await
    );

    let outcome = h
        .pipeline()
        .process(&job(&[ProcessingStep::Size, ProcessingStep::Duration]))
        .await
        .unwrap();

    let JobOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(
        result.failed_steps,
        vec![ProcessingStep::Size, ProcessingStep::Duration]
    );
    assert!(h.records.applied_updates().await.is_empty());
}

#[tokio::test]
async fn test_shorter_rerun_schedules_purge() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    let pipeline = h.pipeline();
    pipeline.process(&job(&[ProcessingStep::Transcode])).await.unwrap();
    assert!(h.dispatch.dispatched().await.is_empty());

    // Same video again, this time the 720p rung is already too thin.
    let h2_toolkit = ScriptedToolkit::hd().with_bitrate(720, 300_000);
    let ports = PipelinePorts {
        toolkit: Arc::new(h2_toolkit),
        ..h.ports()
    };
    Pipeline::new(&ports, h.work_root.path(), CLEANUP_DELAY)
        .process(&job(&[ProcessingStep::Transcode]))
        .await
        .unwrap();

    assert_eq!(h.current().await.sources.len(), 2);

    let dispatched = h.dispatch.take().await;
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].delay, CLEANUP_DELAY);
    let QueueJob::PurgeArtifacts(purge) = &dispatched[0].job else {
        panic!("expected purge job, got {:?}", dispatched[0].job);
    };
    assert_eq!(purge.keys, vec!["uploads/v1.mp4-480p.mp4".to_string()]);

    let deleted = Reaper::new(&h.ports()).purge(purge).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(h.store.get(Bucket::Videos, "uploads/v1.mp4-480p.mp4").await.is_none());
    assert!(h.store.get(Bucket::Videos, "uploads/v1.mp4-720p.mp4").await.is_some());
}

#[tokio::test]
async fn test_reaper_removes_every_version_and_releases_storage() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Premium).await;
    for _ in 0..2 {
        h.store
            .seed(Bucket::Videos, NATIVE_KEY, b"older".to_vec())
            .await;
    }
    let small = "uploads/v1.mp4-small.jpg";
    let large = "uploads/v1.mp4-large.jpg";
    for _ in 0..3 {
        h.store.seed(Bucket::Thumbnails, small, b"s".to_vec()).await;
        h.store.seed(Bucket::Thumbnails, large, b"l".to_vec()).await;
    }
    assert_eq!(h.store.version_count(Bucket::Videos, NATIVE_KEY).await, 3);

    let mut snapshot = record();
    snapshot.thumbnail_small_key = Some(small.to_string());
    snapshot.thumbnail_large_key = Some(large.to_string());
    tokio_test::assert_ok!(h.records.delete(&video_id()).await);

    let outcome = Reaper::new(&h.ports())
        .reap(&ReapVideoJob::deleted(snapshot))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReapOutcome::Reaped {
            versions_deleted: 9,
            released_bytes: 1_000
        }
    );
    for (bucket, key) in [
        (Bucket::Videos, NATIVE_KEY),
        (Bucket::Thumbnails, small),
        (Bucket::Thumbnails, large),
    ] {
        assert_eq!(h.store.version_count(bucket, key).await, 0, "{key}");
    }
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 9_000);
    assert!(h
        .cache
        .invalidated()
        .await
        .contains(&"account:acct-1:videos".to_string()));
}

#[tokio::test]
async fn test_reaper_floors_usage_at_zero() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;
    h.accounts
        .insert(AccountUsage::new(OWNER, PlanTier::Free, 400))
        .await;

    Reaper::new(&h.ports())
        .reap(&ReapVideoJob::deleted(record()))
        .await
        .unwrap();

    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 0);
}

#[tokio::test]
async fn test_expiry_reap_waits_for_schedule() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;
    let reaper = Reaper::new(&h.ports());

    let mut later = record();
    later.scheduled_deletion_at = Some(chrono::Utc::now() + chrono::Duration::days(1));
    h.records.insert(later).await;
    assert_eq!(
        reaper.reap(&ReapVideoJob::expired(video_id())).await.unwrap(),
        ReapOutcome::NotDue
    );
    assert_eq!(h.store.version_count(Bucket::Videos, NATIVE_KEY).await, 1);

    let mut due = record();
    due.scheduled_deletion_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    h.records.insert(due).await;
    let outcome = reaper.reap(&ReapVideoJob::expired(video_id())).await.unwrap();

    assert!(matches!(outcome, ReapOutcome::Reaped { .. }));
    assert!(h.records.get(&video_id()).await.is_none());
    assert_eq!(h.store.version_count(Bucket::Videos, NATIVE_KEY).await, 0);
}

fn due_record() -> VideoRecord {
    let mut due = record();
    due.scheduled_deletion_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    due
}

#[tokio::test]
async fn test_expiry_retry_after_failed_record_delete_releases_once() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;
    h.records.insert(due_record()).await;
    let ports = PipelinePorts {
        records: Arc::new(FlakyDeleteRecords {
            inner: h.records.clone(),
            failed: AtomicBool::new(false),
        }),
        ..h.ports()
    };
    let reaper = Reaper::new(&ports);

    let err = reaper
        .reap(&ReapVideoJob::expired(video_id()))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 10_000);

    let outcome = reaper.reap(&ReapVideoJob::expired(video_id())).await.unwrap();
    assert!(matches!(outcome, ReapOutcome::Reaped { released_bytes: 1_000, .. }));
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 9_000);
    assert!(h.records.get(&video_id()).await.is_none());

    // A further redelivery finds nothing and releases nothing.
    assert_eq!(
        reaper.reap(&ReapVideoJob::expired(video_id())).await.unwrap(),
        ReapOutcome::Missing
    );
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 9_000);
}

#[tokio::test]
async fn test_failed_release_after_expiry_hands_off_snapshot() {
    let h = Harness::new(ScriptedToolkit::hd(), PlanTier::Free).await;
    h.records.insert(due_record()).await;
    let ports = PipelinePorts {
        accounts: Arc::new(FlakyReleaseAccounts {
            inner: h.accounts.clone(),
            failed: AtomicBool::new(false),
        }),
        ..h.ports()
    };
    let reaper = Reaper::new(&ports);

    let outcome = reaper.reap(&ReapVideoJob::expired(video_id())).await.unwrap();
    assert_eq!(outcome, ReapOutcome::HandedOff);
    assert!(h.records.get(&video_id()).await.is_none());
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 10_000);

    let dispatched = h.dispatch.take().await;
    assert_eq!(dispatched.len(), 1);
    let QueueJob::ReapVideo(follow_up) = &dispatched[0].job else {
        panic!("expected reap job");
    };
    assert_eq!(follow_up.reason, ReapReason::Deleted);
    assert!(follow_up.snapshot.is_some());

    let outcome = reaper.reap(follow_up).await.unwrap();
    assert!(matches!(outcome, ReapOutcome::Reaped { .. }));
    assert_eq!(h.accounts.get(OWNER).await.unwrap().storage_used_bytes, 9_000);
}

#[tokio::test]
async fn test_oom_escalates_to_large_memory() {
    let h = Harness::new(ScriptedToolkit::hd().exhausting_transcode(), PlanTier::Premium).await;
    let runner = h.runner();

    let disposition = runner
        .run(&QueueJob::from(job(&[ProcessingStep::Transcode])))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let dispatched = h.dispatch.take().await;
    assert_eq!(dispatched.len(), 1);
    let QueueJob::ProcessVideo(escalated) = &dispatched[0].job else {
        panic!("expected process job");
    };
    assert_eq!(escalated.profile, ExecutionProfile::LargeMemory);
    assert_eq!(escalated.attempt, 2);
    assert!(h.records.applied_updates().await.is_empty());

    // Exhausted again on the large profile: parked for ops.
    let disposition = runner.run(&QueueJob::from(escalated.clone())).await;
    assert!(matches!(disposition, Disposition::DeadLetter(_)));
    assert!(h.dispatch.take().await.is_empty());
}

#[tokio::test]
async fn test_runner_acks_partial_results() {
    let h = Harness::new(ScriptedToolkit::hd().failing_storyboard(), PlanTier::Premium).await;

    let disposition = h
        .runner()
        .run(&QueueJob::from(job(&[ProcessingStep::Storyboard])))
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert!(h.dispatch.dispatched().await.is_empty());
}
