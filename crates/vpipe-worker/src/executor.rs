//! Job executor.
//!
//! `JobExecutor` owns the consume loop: it reads from this profile's stream,
//! runs up to `max_concurrent_jobs` jobs at once, and keeps two background
//! loops alive (stale-claim recovery and delayed-job promotion).
//! `JobRunner` runs a single job under the wall-clock budget and decides
//! what happens to it on failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vpipe_queue::{JobDispatch, JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::context::PipelinePorts;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::orchestrator::{JobOutcome, Pipeline};
use crate::reaper::Reaper;
use crate::retry::FailureTracker;

/// What to do with a job after an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePlan {
    /// Same job, next attempt, after a backoff.
    Retry { delay: Duration },
    /// Re-run on the larger execution profile.
    Escalate,
    /// Give up and surface for ops.
    DeadLetter,
}

/// Route a failed attempt.
///
/// Out-of-memory goes to the larger profile, or to the dead letter stream
/// when the job already ran there. Transient failures and timeouts retry
/// with exponential backoff until `max_attempts`.
pub fn plan_failure(error: &WorkerError, job: &QueueJob, config: &WorkerConfig) -> FailurePlan {
    if error.is_resource_exhausted() {
        return match job {
            QueueJob::ProcessVideo(j) if j.profile.escalate().is_some() => FailurePlan::Escalate,
            _ => FailurePlan::DeadLetter,
        };
    }

    if error.is_retryable() && job.attempt() < config.max_attempts {
        return FailurePlan::Retry {
            delay: config.retry_delay(job.attempt()),
        };
    }

    FailurePlan::DeadLetter
}

/// How the consumed stream entry should be settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done, or handed on as a new queue entry.
    Ack,
    /// Park in the dead letter stream with the reason.
    DeadLetter(String),
}

/// Runs one job and turns its result into a disposition.
pub struct JobRunner {
    pipeline: Pipeline,
    reaper: Reaper,
    dispatch: Arc<dyn JobDispatch>,
    config: WorkerConfig,
}

impl JobRunner {
    pub fn new(ports: &PipelinePorts, config: WorkerConfig) -> Self {
        Self {
            pipeline: Pipeline::new(ports, config.work_dir.clone(), config.cleanup_delay),
            reaper: Reaper::new(ports),
            dispatch: Arc::clone(&ports.dispatch),
            config,
        }
    }

    /// Run `job` under the job timeout and handle its failure.
    pub async fn run(&self, job: &QueueJob) -> Disposition {
        let job_id = job.job_id().to_string();
        info!(
            job_id = %job_id,
            video_id = %job.video_id(),
            kind = job.kind(),
            attempt = job.attempt(),
            "Executing job"
        );

        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.job_timeout, self.execute(job)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(self.config.job_timeout)),
        };

        let (disposition, label) = match result {
            Ok(()) => (Disposition::Ack, "succeeded"),
            Err(e) => {
                error!(job_id = %job_id, "Job failed: {}", e);
                let disposition = self.handle_failure(job, &e).await;
                let label = match disposition {
                    Disposition::Ack => "requeued",
                    Disposition::DeadLetter(_) => "dead_lettered",
                };
                (disposition, label)
            }
        };
        metrics::record_job(job.kind(), label, started.elapsed());
        disposition
    }

    async fn execute(&self, job: &QueueJob) -> WorkerResult<()> {
        match job {
            QueueJob::ProcessVideo(j) => match self.pipeline.process(j).await? {
                JobOutcome::Completed(result) if !result.success => {
                    // Failed steps are reported, not retried; the caller
                    // re-enqueues them when it wants to.
                    warn!(
                        job_id = %j.job_id,
                        failed_steps = ?result.failed_steps,
                        "Job completed with failed steps"
                    );
                    Ok(())
                }
                JobOutcome::Completed(_) => Ok(()),
                JobOutcome::Aborted => {
                    info!(job_id = %j.job_id, "Job aborted, video no longer exists");
                    Ok(())
                }
            },
            QueueJob::ReapVideo(j) => {
                let outcome = self.reaper.reap(j).await?;
                debug!(job_id = %j.job_id, ?outcome, "Reap finished");
                Ok(())
            }
            QueueJob::PurgeArtifacts(j) => {
                self.reaper.purge(j).await?;
                Ok(())
            }
        }
    }

    async fn handle_failure(&self, job: &QueueJob, error: &WorkerError) -> Disposition {
        let job_id = job.job_id();

        let next = match plan_failure(error, job, &self.config) {
            FailurePlan::DeadLetter => return Disposition::DeadLetter(error.to_string()),
            FailurePlan::Retry { delay } => {
                info!(
                    job_id = %job_id,
                    "Retrying as attempt {}/{} in {:?}",
                    job.attempt() + 1,
                    self.config.max_attempts,
                    delay
                );
                metrics::record_follow_up(job.kind(), "retry");
                self.dispatch.enqueue_after(job.next_attempt(), delay).await
            }
            FailurePlan::Escalate => {
                let QueueJob::ProcessVideo(process) = job else {
                    return Disposition::DeadLetter(error.to_string());
                };
                let Some(escalated) = process.escalated() else {
                    return Disposition::DeadLetter(error.to_string());
                };
                warn!(
                    job_id = %job_id,
                    profile = %escalated.profile,
                    "Resource exhausted, escalating to larger profile"
                );
                metrics::record_follow_up(job.kind(), "escalate");
                self.dispatch.enqueue(escalated.into()).await
            }
        };

        match next {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_duplicate() => {
                debug!(job_id = %job_id, "Follow-up job already queued");
                Disposition::Ack
            }
            // Parked rather than lost.
            Err(e) => {
                error!(job_id = %job_id, "Could not enqueue follow-up job: {}", e);
                Disposition::DeadLetter(format!("{} (follow-up enqueue failed: {})", error, e))
            }
        }
    }
}

/// Who holds a stream entry and how often they re-assert it.
#[derive(Debug, Clone)]
struct Lease {
    consumer_name: String,
    heartbeat: Duration,
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, ports: PipelinePorts) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        let runner = Arc::new(JobRunner::new(&ports, config.clone()));

        Self {
            config,
            queue,
            runner,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor; returns after shutdown once in-flight jobs drain.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' on {} with {} max concurrent jobs",
            self.consumer_name,
            self.queue.own_stream(),
            self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_loop();
        let promote_task = self.spawn_promote_loop();

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming jobs: {}", e);
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        claim_task.abort();
        promote_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be reclaimed",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.job_semaphore);
        let lease = self.lease();
        let interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.claim_pending(&lease.consumer_name, min_idle_ms, 5).await {
                            Ok(jobs) => {
                                failures.record_success();
                                if !jobs.is_empty() {
                                    info!("Claimed {} pending jobs", jobs.len());
                                }
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let runner = Arc::clone(&runner);
                                    let lease = lease.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(runner, queue, lease, message_id, job).await;
                                    });
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim pending jobs: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_promote_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let interval = self.config.promote_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.promote_due(50).await {
                            Ok(promoted) => {
                                failures.record_success();
                                if promoted > 0 {
                                    debug!("Promoted {} delayed jobs", promoted);
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to promote delayed jobs: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let runner = Arc::clone(&self.runner);
            let queue = Arc::clone(&self.queue);
            let lease = self.lease();
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(runner, queue, lease, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Run one stream entry and settle it, refreshing the claim while it runs.
    async fn execute_job(
        runner: Arc<JobRunner>,
        queue: Arc<JobQueue>,
        lease: Lease,
        message_id: String,
        job: QueueJob,
    ) {
        let job_id = job.job_id().to_string();

        let run = runner.run(&job);
        tokio::pin!(run);
        let mut heartbeat = tokio::time::interval(lease.heartbeat);
        heartbeat.tick().await;

        let disposition = loop {
            tokio::select! {
                disposition = &mut run => break disposition,
                _ = heartbeat.tick() => {
                    if let Err(e) = queue.heartbeat(&lease.consumer_name, &message_id).await {
                        warn!("Failed to refresh claim on job {}: {}", job_id, e);
                    }
                }
            }
        };

        match disposition {
            Disposition::Ack => {
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
            }
            Disposition::DeadLetter(reason) => {
                if let Err(e) = queue.dlq(&message_id, &job, &reason).await {
                    error!("Failed to move job {} to DLQ: {}", job_id, e);
                }
            }
        }
    }

    fn lease(&self) -> Lease {
        Lease {
            consumer_name: self.consumer_name.clone(),
            heartbeat: self.config.heartbeat_interval(),
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Handle for signalling shutdown from another task.
    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_media::MediaError;
    use vpipe_models::{ExecutionProfile, VideoId};
    use vpipe_queue::{ProcessVideoJob, ReapVideoJob};
    use vpipe_storage::StorageError;

    fn process_job(profile: ExecutionProfile, attempt: u32) -> QueueJob {
        let mut job = ProcessVideoJob::all_steps(VideoId::from("v1")).with_profile(profile);
        job.attempt = attempt;
        job.into()
    }

    fn oom() -> WorkerError {
        MediaError::ResourceExhausted("ffmpeg killed by SIGKILL".into()).into()
    }

    #[test]
    fn test_oom_escalates_once() {
        let config = WorkerConfig::default();

        assert_eq!(
            plan_failure(&oom(), &process_job(ExecutionProfile::Standard, 1), &config),
            FailurePlan::Escalate
        );
        assert_eq!(
            plan_failure(&oom(), &process_job(ExecutionProfile::LargeMemory, 2), &config),
            FailurePlan::DeadLetter
        );
    }

    #[test]
    fn test_transient_failure_backs_off() {
        let config = WorkerConfig::default();
        let transient: WorkerError = StorageError::transient("503").into();

        assert_eq!(
            plan_failure(&transient, &process_job(ExecutionProfile::Standard, 2), &config),
            FailurePlan::Retry {
                delay: config.retry_delay(2)
            }
        );
        assert_eq!(
            plan_failure(&transient, &process_job(ExecutionProfile::Standard, 3), &config),
            FailurePlan::DeadLetter
        );
    }

    #[test]
    fn test_timeout_is_retried() {
        let config = WorkerConfig::default();
        let job: QueueJob = ReapVideoJob::expired(VideoId::from("v1")).into();

        assert!(matches!(
            plan_failure(&WorkerError::Timeout(config.job_timeout), &job, &config),
            FailurePlan::Retry { .. }
        ));
    }

    #[test]
    fn test_permanent_failure_dead_letters() {
        let config = WorkerConfig::default();
        assert_eq!(
            plan_failure(
                &WorkerError::job_failed("bad input"),
                &process_job(ExecutionProfile::Standard, 1),
                &config
            ),
            FailurePlan::DeadLetter
        );
    }
}
