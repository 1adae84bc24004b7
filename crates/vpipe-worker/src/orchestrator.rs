//! Video processing orchestrator.
//!
//! One `process` call is one attempt of a `ProcessVideoJob`. The attempt owns
//! its working directory and walks the state machine in `state.rs`:
//! fetch the native file, probe it, derive posters, storyboard and duration
//! side by side, run the resolution ladder, publish the artifacts and merge
//! every derived field into the record with a single write.
//!
//! Step-local failures end up in `JobResult::failed_steps`. Only transient
//! infrastructure errors and resource exhaustion are returned as errors, so
//! the executor can retry or escalate. A record that disappears mid-run ends
//! the attempt as `JobOutcome::Aborted` with nothing further published.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vpipe_firestore::{AccountStore, VideoRecordStore};
use vpipe_media::{plan_ladder, should_continue, MediaProbe, StoryboardSprite, Thumbnails};
use vpipe_models::encoding::{IMAGE_MIME_TYPE, RUNG_MIME_TYPE};
use vpipe_models::keys::{rung_key, storyboard_key, thumbnail_large_key, thumbnail_small_key};
use vpipe_models::{
    EncodingConfig, JobResult, ProcessingStep, Storyboard, VideoId, VideoRecord, VideoSource,
    VideoUpdate,
};
use vpipe_queue::{JobDispatch, ProcessVideoJob, PurgeArtifactsJob};
use vpipe_storage::{Bucket, ObjectStore, StorageError, StorageResult};

use crate::context::PipelinePorts;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{JobLogger, Outcome};
use crate::retry::{retry_async, RetryConfig};
use crate::state::{PipelineState, StateTracker};
use crate::toolkit::MediaToolkit;
use crate::workdir::WorkDir;
use crate::writer::RecordWriter;

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Ran to the end; some steps may have failed.
    Completed(JobResult),
    /// The record vanished. Not a failure.
    Aborted,
}

impl JobOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, JobOutcome::Aborted)
    }
}

/// Result of the transcode stage.
#[derive(Debug)]
enum Ladder {
    /// Tier policy says no ladder.
    Skipped,
    /// Every planned rung ran, or the bitrate rule ended the ladder.
    Produced(Vec<VideoSource>),
    /// A rung failed; the rungs before it are kept.
    Failed(Vec<VideoSource>),
    Aborted,
}

/// Artifacts that made it to storage, ready to be recorded.
#[derive(Debug, Default)]
struct Published {
    thumbnails: Option<(String, String)>,
    storyboard: Option<Storyboard>,
}

pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn VideoRecordStore>,
    accounts: Arc<dyn AccountStore>,
    dispatch: Arc<dyn JobDispatch>,
    toolkit: Arc<dyn MediaToolkit>,
    writer: RecordWriter,
    work_root: PathBuf,
    cleanup_delay: Duration,
    publish_retry: RetryConfig,
}

impl Pipeline {
    pub fn new(
        ports: &PipelinePorts,
        work_root: impl Into<PathBuf>,
        cleanup_delay: Duration,
    ) -> Self {
        Self {
            store: Arc::clone(&ports.store),
            records: Arc::clone(&ports.records),
            accounts: Arc::clone(&ports.accounts),
            dispatch: Arc::clone(&ports.dispatch),
            toolkit: Arc::clone(&ports.toolkit),
            writer: RecordWriter::new(Arc::clone(&ports.records), Arc::clone(&ports.cache)),
            work_root: work_root.into(),
            cleanup_delay,
            publish_retry: RetryConfig::new("publish artifact"),
        }
    }

    /// Run one attempt of `job`.
    pub async fn process(&self, job: &ProcessVideoJob) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(&job.job_id, &job.video_id, "process_video", job.attempt);
        let mut tracker = StateTracker::new(job.job_id.clone(), job.video_id.clone());
        let steps = &job.steps;

        let Some(record) = self.records.read(&job.video_id).await? else {
            logger.log_warning("video record not found, nothing to process");
            tracker.abort();
            return Ok(JobOutcome::Aborted);
        };

        let step_names: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
        logger.log_start(&format!(
            "steps=[{}] profile={} force_transcode={} tags=[{}]",
            step_names.join(","),
            job.profile,
            job.force_transcode,
            job.tags.join(",")
        ));

        // Dropped on every return path, which reclaims partial outputs too.
        let work = WorkDir::acquire(&self.work_root, job.job_id.as_str()).await?;
        let native = work.native_path();

        // Fetching
        let native_size = match self.store.fetch_native(&record.native_key, &native).await {
            Ok(size) => size,
            Err(e) if e.is_not_found() => {
                logger.log_error(&format!("native file {} is missing", record.native_key));
                tracker.advance(PipelineState::Done, Outcome::Failed);
                return Ok(JobOutcome::Completed(JobResult::from_failures(
                    steps.iter().copied().collect(),
                )));
            }
            Err(e) => return Err(e.into()),
        };
        tracker.advance(PipelineState::Probing, Outcome::Succeeded);

        // Probing
        let (probe, probe_outcome) = match self.toolkit.probe(&native).await {
            Ok(probe) => (probe, Outcome::Succeeded),
            Err(e) if e.is_resource_exhausted() => return Err(e.into()),
            Err(e) => {
                logger.log_warning(&format!("probe failed: {}", e));
                (MediaProbe::default(), Outcome::Failed)
            }
        };

        let mut failed = Vec::new();

        // Thumbnailing, Storyboarding and DurationProbing are independent.
        let (posters, sprite) = tokio::join!(
            self.posters_branch(steps.contains(&ProcessingStep::Thumbnails), &work, &native),
            self.storyboard_branch(
                steps.contains(&ProcessingStep::Storyboard),
                &work,
                &native,
                probe.duration_secs,
            ),
        );
        let thumbnails = settle_branch(
            posters,
            ProcessingStep::Thumbnails,
            PipelineState::Thumbnailing,
            &mut tracker,
            &logger,
            &mut failed,
        )?;
        let sprite = settle_branch(
            sprite,
            ProcessingStep::Storyboard,
            PipelineState::Storyboarding,
            &mut tracker,
            &logger,
            &mut failed,
        )?;

        let duration = if steps.contains(&ProcessingStep::Duration) {
            let started = Instant::now();
            let result = probe
                .duration_secs
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| WorkerError::job_failed("duration could not be probed"));
            settle_branch(
                Some((started, result)),
                ProcessingStep::Duration,
                PipelineState::DurationProbing,
                &mut tracker,
                &logger,
                &mut failed,
            )?
        } else {
            None
        };

        if let Some(thumbnails) = &thumbnails {
            if thumbnails.is_fallback {
                logger.log_warning("no usable frame, using blank poster");
            }
        }

        // Transcoding
        tracker.advance(PipelineState::Transcoding, probe_outcome);
        let ladder = if steps.contains(&ProcessingStep::Transcode) {
            self.run_ladder(job, &record, &probe, &work, &logger).await?
        } else {
            Ladder::Skipped
        };
        let rungs = match ladder {
            Ladder::Aborted => {
                logger.log_progress("record deleted during transcode, abandoning");
                tracker.abort();
                return Ok(JobOutcome::Aborted);
            }
            Ladder::Skipped => {
                tracker.advance(PipelineState::Publishing, Outcome::Skipped);
                None
            }
            Ladder::Produced(rungs) => {
                tracker.advance(PipelineState::Publishing, Outcome::Succeeded);
                Some(rungs)
            }
            Ladder::Failed(rungs) => {
                failed.push(ProcessingStep::Transcode);
                tracker.advance(PipelineState::Publishing, Outcome::Failed);
                // A failed first rung leaves the existing sources alone.
                (!rungs.is_empty()).then_some(rungs)
            }
        };

        // Publishing
        let published = if thumbnails.is_some() || sprite.is_some() {
            if !self.records.exists(&job.video_id).await? {
                logger.log_progress("record deleted before publishing, abandoning");
                tracker.abort();
                return Ok(JobOutcome::Aborted);
            }
            self.publish_images(&record, thumbnails, sprite, &logger, &mut failed)
                .await?
        } else {
            Published::default()
        };
        let publish_outcome = if failed
            .iter()
            .any(|s| matches!(s, ProcessingStep::Thumbnails | ProcessingStep::Storyboard))
        {
            Outcome::Failed
        } else {
            Outcome::Succeeded
        };
        tracker.advance(PipelineState::Recording, publish_outcome);

        // Recording
        let size = steps
            .contains(&ProcessingStep::Size)
            .then_some(native_size);
        let update = build_update(&record, &probe, size, duration, published, rungs);

        let stale = if update.is_empty() {
            logger.log_progress("nothing to record");
            Vec::new()
        } else {
            match self.writer.write(&job.video_id, &update).await? {
                Some(updated) => unreferenced_rungs(&record, &updated),
                None => {
                    logger.log_progress("record deleted before the final write, abandoning");
                    tracker.abort();
                    return Ok(JobOutcome::Aborted);
                }
            }
        };
        tracker.advance(PipelineState::Done, Outcome::Succeeded);

        if !stale.is_empty() {
            self.schedule_purge(&job.video_id, stale, &logger).await;
        }

        let result = JobResult::from_failures(failed);
        if result.success {
            logger.log_completion("all requested steps succeeded");
        } else {
            let names: Vec<&str> = result.failed_steps.iter().map(|s| s.as_str()).collect();
            logger.log_completion(&format!("failed steps: {}", names.join(",")));
        }
        Ok(JobOutcome::Completed(result))
    }

    async fn posters_branch(
        &self,
        requested: bool,
        work: &WorkDir,
        native: &Path,
    ) -> Option<(Instant, WorkerResult<Thumbnails>)> {
        if !requested {
            return None;
        }
        let started = Instant::now();
        let result = match work.subdir("posters").await {
            Ok(scratch) => self
                .toolkit
                .render_posters(native, &scratch)
                .await
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };
        Some((started, result))
    }

    async fn storyboard_branch(
        &self,
        requested: bool,
        work: &WorkDir,
        native: &Path,
        duration_secs: Option<f64>,
    ) -> Option<(Instant, WorkerResult<StoryboardSprite>)> {
        if !requested {
            return None;
        }
        let started = Instant::now();
        let result = match work.subdir("storyboard").await {
            Ok(scratch) => self
                .toolkit
                .build_storyboard(native, &scratch, duration_secs)
                .await
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };
        Some((started, result))
    }

    /// Transcode and publish rungs tallest first.
    ///
    /// Each rung's own measured bitrate decides whether the next one runs.
    /// The record's existence is checked before every rung upload.
    async fn run_ladder(
        &self,
        job: &ProcessVideoJob,
        record: &VideoRecord,
        probe: &MediaProbe,
        work: &WorkDir,
        logger: &JobLogger,
    ) -> WorkerResult<Ladder> {
        let tier = match self.accounts.tier(&record.owner_id).await {
            Ok(tier) => tier,
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                logger.log_warning(&format!("could not resolve account tier: {}", e));
                return Ok(Ladder::Failed(Vec::new()));
            }
        };

        if !tier.allows_transcoding(job.force_transcode) {
            logger.log_progress(&format!("transcoding not enabled for {} tier", tier));
            return Ok(Ladder::Skipped);
        }

        let Some((width, height)) = probe.dimensions() else {
            logger.log_warning("native resolution unknown, cannot plan ladder");
            return Ok(Ladder::Failed(Vec::new()));
        };

        let native = work.native_path();
        let mut produced = Vec::new();

        for rung in plan_ladder(width, height) {
            let output = work.rung_path(rung.height);
            let encoding = EncodingConfig::for_rung(tier, rung.height);

            let bitrate = match self
                .toolkit
                .transcode(&native, &output, rung, &encoding)
                .await
            {
                Ok(bitrate) => bitrate,
                Err(e) if e.is_resource_exhausted() => return Err(e.into()),
                Err(e) => {
                    logger.log_warning(&format!("{}p rung failed: {}", rung.height, e));
                    return Ok(Ladder::Failed(produced));
                }
            };

            if !self.records.exists(&job.video_id).await? {
                return Ok(Ladder::Aborted);
            }

            let key = rung_key(&record.native_key, rung.height);
            match self
                .publish_with_retry(|| {
                    self.store
                        .publish_file(Bucket::Videos, &key, &output, RUNG_MIME_TYPE)
                })
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    logger.log_warning(&format!("{}p rung upload failed: {}", rung.height, e));
                    return Ok(Ladder::Failed(produced));
                }
            }

            // Frees scratch space before the next rung; the directory goes anyway.
            let _ = tokio::fs::remove_file(&output).await;

            logger.log_progress(&format!(
                "{}x{} rung published at {:?} bps",
                rung.width, rung.height, bitrate
            ));
            produced.push(VideoSource::transcoded(
                key,
                RUNG_MIME_TYPE,
                rung.width,
                rung.height,
                bitrate,
            ));

            if !should_continue(bitrate) {
                logger.log_progress("rung bitrate at or below threshold, ladder complete");
                break;
            }
        }

        Ok(Ladder::Produced(produced))
    }

    /// Publish posters and storyboard.
    ///
    /// The two posters are recorded together or not at all; if the large one
    /// fails after the small one landed, the small one is removed again.
    async fn publish_images(
        &self,
        record: &VideoRecord,
        thumbnails: Option<Thumbnails>,
        sprite: Option<StoryboardSprite>,
        logger: &JobLogger,
        failed: &mut Vec<ProcessingStep>,
    ) -> WorkerResult<Published> {
        let mut published = Published::default();

        if let Some(thumbnails) = thumbnails {
            let small_key = thumbnail_small_key(&record.native_key);
            let large_key = thumbnail_large_key(&record.native_key);

            let result = match self.publish_image(&small_key, thumbnails.small).await {
                Ok(()) => match self.publish_image(&large_key, thumbnails.large).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        if let Err(cleanup) = self
                            .store
                            .delete(Bucket::Thumbnails, &[small_key.clone()], false)
                            .await
                        {
                            logger.log_warning(&format!(
                                "could not remove orphaned poster {}: {}",
                                small_key, cleanup
                            ));
                        }
                        Err(e)
                    }
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => published.thumbnails = Some((small_key, large_key)),
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    logger.log_warning(&format!("poster upload failed: {}", e));
                    failed.push(ProcessingStep::Thumbnails);
                }
            }
        }

        if let Some(sprite) = sprite {
            let key = storyboard_key(&record.native_key);
            match self.publish_image(&key, sprite.image).await {
                Ok(()) => published.storyboard = Some(sprite.manifest),
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    logger.log_warning(&format!("storyboard upload failed: {}", e));
                    failed.push(ProcessingStep::Storyboard);
                }
            }
        }

        Ok(published)
    }

    async fn publish_image(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.publish_with_retry(|| {
            self.store
                .publish(Bucket::Thumbnails, key, bytes.clone(), IMAGE_MIME_TYPE)
        })
        .await
    }

    async fn publish_with_retry<F, Fut>(&self, publish: F) -> StorageResult<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<()>>,
    {
        retry_async(&self.publish_retry, StorageError::is_retryable, publish).await
    }

    async fn schedule_purge(&self, video_id: &VideoId, keys: Vec<String>, logger: &JobLogger) {
        let count = keys.len();
        let job = PurgeArtifactsJob::new(video_id.clone(), keys);
        match self
            .dispatch
            .enqueue_after(job.into(), self.cleanup_delay)
            .await
        {
            Ok(_) => logger.log_progress(&format!(
                "scheduled cleanup of {} dropped rungs in {:?}",
                count, self.cleanup_delay
            )),
            Err(e) if e.is_duplicate() => {}
            Err(e) => logger.log_warning(&format!("could not schedule rung cleanup: {}", e)),
        }
    }
}

/// Record a finished branch on the tracker.
///
/// Resource exhaustion is returned so the attempt can be escalated; every
/// other failure only marks `step` failed.
fn settle_branch<T>(
    branch: Option<(Instant, WorkerResult<T>)>,
    step: ProcessingStep,
    state: PipelineState,
    tracker: &mut StateTracker,
    logger: &JobLogger,
    failed: &mut Vec<ProcessingStep>,
) -> WorkerResult<Option<T>> {
    let Some((started, result)) = branch else {
        return Ok(None);
    };

    match result {
        Ok(value) => {
            tracker.branch(state, started, Outcome::Succeeded);
            Ok(Some(value))
        }
        Err(e) => {
            tracker.branch(state, started, Outcome::Failed);
            if e.is_resource_exhausted() {
                return Err(e);
            }
            logger.log_warning(&format!("{} step failed: {}", step, e));
            failed.push(step);
            Ok(None)
        }
    }
}

/// Native source entry synthesized from the probe for records that lack one.
fn backfilled_native(record: &VideoRecord, probe: &MediaProbe) -> VideoSource {
    let mime = probe
        .mime_type
        .clone()
        .unwrap_or_else(|| RUNG_MIME_TYPE.to_string());
    VideoSource::native(record.native_key.clone(), mime)
        .with_dimensions(probe.width, probe.height)
        .with_bitrate(probe.bitrate)
}

/// Merge everything the attempt produced into one update.
fn build_update(
    record: &VideoRecord,
    probe: &MediaProbe,
    size: Option<u64>,
    duration: Option<f64>,
    published: Published,
    rungs: Option<Vec<VideoSource>>,
) -> VideoUpdate {
    let mut update = VideoUpdate::new();

    if let Some(size) = size {
        update = update.with_file_size(size);
    }
    if let Some((small, large)) = published.thumbnails {
        update = update.with_thumbnails(small, large);
    }
    if let Some(duration) = duration {
        update = update.with_duration(duration);
    }
    if let Some(storyboard) = published.storyboard {
        update = update.with_storyboard(storyboard);
    }

    let native = record.native_source().cloned();
    let sources = match (native, rungs) {
        (native, Some(rungs)) => {
            let mut sources =
                vec![native.unwrap_or_else(|| backfilled_native(record, probe))];
            sources.extend(rungs);
            Some(sources)
        }
        (None, None) => Some(vec![backfilled_native(record, probe)]),
        (Some(_), None) => None,
    };
    if let Some(sources) = sources {
        update = update.with_sources(sources);
    }

    if !record.processing_complete {
        update = update.with_processing_complete(true);
    }
    update
}

/// Rung keys the record listed before the write but no longer references.
fn unreferenced_rungs(before: &VideoRecord, after: &VideoRecord) -> Vec<String> {
    before
        .transcoded_keys()
        .into_iter()
        .filter(|key| !after.references_key(key))
        .collect()
}
