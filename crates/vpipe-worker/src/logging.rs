//! Structured job logging utilities.
//!
//! `JobLogger` gives every job the same lifecycle log lines and span.
//! `PipelineEvent` is the one structured event emitted per state transition;
//! it goes to the `vpipe::pipeline` target so collectors can subscribe to it
//! without the rest of the worker's logs.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use vpipe_models::{JobId, VideoId};

/// Target every pipeline transition event is emitted under.
pub const PIPELINE_EVENT_TARGET: &str = "vpipe::pipeline";

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    operation: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, video_id: &VideoId, operation: &str, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            video_id: video_id.to_string(),
            operation: operation.to_string(),
            attempt,
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            attempt = self.attempt
        )
    }
}

/// How a pipeline state ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Aborted => "aborted",
        }
    }
}

/// One state-machine transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub component: &'static str,
    pub state: &'static str,
    pub job_id: String,
    pub video_id: String,
    pub duration: Duration,
    pub outcome: Outcome,
}

impl PipelineEvent {
    pub fn emit(&self) {
        info!(
            target: PIPELINE_EVENT_TARGET,
            component = self.component,
            state = self.state,
            job_id = %self.job_id,
            video_id = %self.video_id,
            duration_ms = self.duration.as_millis() as u64,
            outcome = self.outcome.as_str(),
            "pipeline transition"
        );
    }
}
