//! Job dispatch port.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::JobQueue;

/// Anything that can schedule pipeline work.
#[async_trait]
pub trait JobDispatch: Send + Sync {
    /// Schedule a job now. Returns a handle (message or job ID).
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String>;

    /// Schedule a job to become visible after `delay`.
    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<String>;
}

#[async_trait]
impl JobDispatch for JobQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        JobQueue::enqueue(self, &job).await
    }

    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<String> {
        JobQueue::enqueue_after(self, &job, delay).await
    }
}

/// A job captured by [`MemoryDispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedJob {
    pub job: QueueJob,
    pub delay: Duration,
}

/// Records dispatched jobs instead of sending them anywhere.
#[derive(Debug, Default)]
pub struct MemoryDispatch {
    jobs: Mutex<Vec<DispatchedJob>>,
    seen: Mutex<HashSet<String>>,
}

impl MemoryDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched so far, in order.
    pub async fn dispatched(&self) -> Vec<DispatchedJob> {
        self.jobs.lock().await.clone()
    }

    /// Drain the recorded jobs.
    pub async fn take(&self) -> Vec<DispatchedJob> {
        std::mem::take(&mut *self.jobs.lock().await)
    }

    async fn record(&self, job: QueueJob, delay: Duration) -> QueueResult<String> {
        let key = job.idempotency_key();
        if !self.seen.lock().await.insert(key.clone()) {
            return Err(QueueError::duplicate(key));
        }

        let id = job.job_id().to_string();
        self.jobs.lock().await.push(DispatchedJob { job, delay });
        Ok(id)
    }
}

#[async_trait]
impl JobDispatch for MemoryDispatch {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        self.record(job, Duration::ZERO).await
    }

    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<String> {
        self.record(job, delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ProcessVideoJob, PurgeArtifactsJob};
    use vpipe_models::VideoId;

    #[tokio::test]
    async fn test_memory_dispatch_records_and_dedups() {
        let dispatch = MemoryDispatch::new();
        let job = QueueJob::from(ProcessVideoJob::all_steps(VideoId::from("v1")));

        dispatch.enqueue(job.clone()).await.unwrap();
        let err = dispatch.enqueue(job.clone()).await.unwrap_err();
        assert!(err.is_duplicate());

        let purge = QueueJob::from(PurgeArtifactsJob::new(VideoId::from("v1"), vec![]));
        dispatch
            .enqueue_after(purge, Duration::from_secs(60))
            .await
            .unwrap();

        let jobs = dispatch.take().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].delay, Duration::ZERO);
        assert_eq!(jobs[1].delay, Duration::from_secs(60));
        assert!(dispatch.dispatched().await.is_empty());
    }
}
