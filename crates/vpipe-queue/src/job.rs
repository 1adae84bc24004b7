//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vpipe_models::{ExecutionProfile, JobId, ProcessingStep, StepSet, VideoId, VideoRecord};

/// Job to derive artifacts for an uploaded video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Video to process
    pub video_id: VideoId,
    /// Requested steps
    pub steps: StepSet,
    /// Run the ladder even on tiers that normally skip it
    #[serde(default)]
    pub force_transcode: bool,
    /// Free-form labels carried into logs
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1-based attempt number
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// Worker class that should run the job
    #[serde(default)]
    pub profile: ExecutionProfile,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl ProcessVideoJob {
    pub fn new(video_id: VideoId, steps: impl IntoIterator<Item = ProcessingStep>) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            steps: steps.into_iter().collect(),
            force_transcode: false,
            tags: Vec::new(),
            attempt: 1,
            profile: ExecutionProfile::default(),
            created_at: Utc::now(),
        }
    }

    /// Every step on a freshly uploaded video.
    pub fn all_steps(video_id: VideoId) -> Self {
        Self::new(video_id, ProcessingStep::ALL)
    }

    pub fn with_force_transcode(mut self, force: bool) -> Self {
        self.force_transcode = force;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_profile(mut self, profile: ExecutionProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Same work on a larger profile, counted as a new attempt.
    pub fn escalated(&self) -> Option<Self> {
        let profile = self.profile.escalate()?;
        let mut next = self.clone();
        next.profile = profile;
        next.attempt += 1;
        Some(next)
    }

    /// Re-enqueue only the steps that failed.
    pub fn retry_steps(&self, failed: &[ProcessingStep]) -> Self {
        Self {
            job_id: JobId::new(),
            steps: failed.iter().copied().collect(),
            attempt: 1,
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    fn steps_key(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Generate idempotency key for deduplication.
    ///
    /// Redelivering the same job at the same attempt is a duplicate. Retries,
    /// escalations and `retry_steps` follow-ups are not, since they advance
    /// the attempt or start a new job ID.
    pub fn idempotency_key(&self) -> String {
        format!(
            "process:{}:{}:{}:{}:{}:{}",
            self.video_id,
            self.steps_key(),
            if self.force_transcode { "forced" } else { "auto" },
            self.profile,
            self.job_id,
            self.attempt
        )
    }
}

/// Why artifacts are being reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapReason {
    /// The owner deleted the video; the record is already gone.
    Deleted,
    /// The scheduled deletion time passed; the reaper removes the record.
    Expired,
}

impl ReapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReapReason::Deleted => "deleted",
            ReapReason::Expired => "expired",
        }
    }
}

/// Job to remove every artifact of a video and release its storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReapVideoJob {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub reason: ReapReason,
    /// Record as it was when deleted. Required for `Deleted`; `Expired`
    /// jobs re-read the live record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<VideoRecord>,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl ReapVideoJob {
    /// Reap a video whose record the caller already deleted.
    pub fn deleted(record: VideoRecord) -> Self {
        Self {
            job_id: JobId::new(),
            video_id: record.id.clone(),
            reason: ReapReason::Deleted,
            snapshot: Some(record),
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    /// Reap a video if its scheduled deletion time has passed.
    pub fn expired(video_id: VideoId) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            reason: ReapReason::Expired,
            snapshot: None,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("reap:{}:{}:{}", self.video_id, self.reason.as_str(), self.attempt)
    }
}

/// Job to delete rung objects a re-run no longer references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeArtifactsJob {
    pub job_id: JobId,
    pub video_id: VideoId,
    /// Keys in the video bucket
    pub keys: Vec<String>,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl PurgeArtifactsJob {
    pub fn new(video_id: VideoId, keys: Vec<String>) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            keys,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("purge:{}:{}:{}", self.video_id, self.job_id, self.attempt)
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Derive posters, storyboard, duration and the resolution ladder
    ProcessVideo(ProcessVideoJob),
    /// Remove every artifact of a deleted or expired video
    ReapVideo(ReapVideoJob),
    /// Deferred cleanup of rungs dropped by a re-run
    PurgeArtifacts(PurgeArtifactsJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ProcessVideo(j) => &j.job_id,
            QueueJob::ReapVideo(j) => &j.job_id,
            QueueJob::PurgeArtifacts(j) => &j.job_id,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            QueueJob::ProcessVideo(j) => &j.video_id,
            QueueJob::ReapVideo(j) => &j.video_id,
            QueueJob::PurgeArtifacts(j) => &j.video_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::ProcessVideo(_) => "process_video",
            QueueJob::ReapVideo(_) => "reap_video",
            QueueJob::PurgeArtifacts(_) => "purge_artifacts",
        }
    }

    /// Worker class that should run this job. Only processing jobs escalate.
    pub fn profile(&self) -> ExecutionProfile {
        match self {
            QueueJob::ProcessVideo(j) => j.profile,
            _ => ExecutionProfile::Standard,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            QueueJob::ProcessVideo(j) => j.attempt,
            QueueJob::ReapVideo(j) => j.attempt,
            QueueJob::PurgeArtifacts(j) => j.attempt,
        }
    }

    /// Copy of this job with the attempt counter advanced.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        match &mut next {
            QueueJob::ProcessVideo(j) => j.attempt += 1,
            QueueJob::ReapVideo(j) => j.attempt += 1,
            QueueJob::PurgeArtifacts(j) => j.attempt += 1,
        }
        next
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ProcessVideo(j) => j.idempotency_key(),
            QueueJob::ReapVideo(j) => j.idempotency_key(),
            QueueJob::PurgeArtifacts(j) => j.idempotency_key(),
        }
    }
}

impl From<ProcessVideoJob> for QueueJob {
    fn from(job: ProcessVideoJob) -> Self {
        QueueJob::ProcessVideo(job)
    }
}

impl From<ReapVideoJob> for QueueJob {
    fn from(job: ReapVideoJob) -> Self {
        QueueJob::ReapVideo(job)
    }
}

impl From<PurgeArtifactsJob> for QueueJob {
    fn from(job: PurgeArtifactsJob) -> Self {
        QueueJob::PurgeArtifacts(job)
    }
}
