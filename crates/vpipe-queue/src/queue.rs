//! Job queue using Redis Streams.
//!
//! Each execution profile has its own stream (`{stream}:{profile}`) so that
//! large-memory workers only see escalated jobs. Delayed jobs sit in a sorted
//! set scored by due time until a worker promotes them into their stream.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vpipe_models::ExecutionProfile;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Dedup window for identical enqueues.
const DEDUP_TTL_SECS: u64 = 3600;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Base stream name; the profile is appended
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Sorted set holding delayed jobs
    pub delayed_set_name: String,
    /// Profile this process consumes
    pub profile: ExecutionProfile,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vpipe:jobs".to_string(),
            consumer_group: "vpipe:workers".to_string(),
            dlq_stream_name: "vpipe:dlq".to_string(),
            delayed_set_name: "vpipe:delayed".to_string(),
            profile: ExecutionProfile::Standard,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            delayed_set_name: std::env::var("QUEUE_DELAYED_SET")
                .unwrap_or(defaults.delayed_set_name),
            profile: std::env::var("WORKER_PROFILE")
                .map(|s| ExecutionProfile::from_str(&s))
                .unwrap_or(defaults.profile),
        }
    }

    /// Stream that carries jobs for `profile`.
    pub fn stream_for(&self, profile: ExecutionProfile) -> String {
        format!("{}:{}", self.stream_name, profile)
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.stream_name, idempotency_key)
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Stream this process consumes.
    pub fn own_stream(&self) -> String {
        self.config.stream_for(self.config.profile)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer groups if missing).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        for profile in [ExecutionProfile::Standard, ExecutionProfile::LargeMemory] {
            let stream = self.config.stream_for(profile);

            // Start from 0 so jobs enqueued before the group existed are delivered.
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!("Created consumer group {} on {}", self.config.consumer_group, stream),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!("Consumer group already exists on {}", stream);
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Claim the dedup key for a job; fails if it was enqueued recently.
    async fn claim_dedup(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueueJob,
    ) -> QueueResult<()> {
        let idempotency_key = job.idempotency_key();
        let dedup_key = self.config.dedup_key(&idempotency_key);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(conn)
            .await?;

        if claimed.is_none() {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::duplicate(idempotency_key));
        }
        Ok(())
    }

    async fn add_to_stream(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueueJob,
    ) -> QueueResult<String> {
        let payload = serde_json::to_string(job)?;
        let stream = self.config.stream_for(job.profile());

        let message_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(conn)
            .await?;

        Ok(message_id)
    }

    /// Enqueue a job on its profile's stream.
    pub async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        self.claim_dedup(&mut conn, job).await?;
        let message_id = self.add_to_stream(&mut conn, job).await?;

        info!(
            job_id = %job.job_id(),
            kind = job.kind(),
            profile = %job.profile(),
            "Enqueued job with message ID {}",
            message_id
        );
        Ok(message_id)
    }

    /// Park a job until `delay` has elapsed. Returns the job ID.
    pub async fn enqueue_after(&self, job: &QueueJob, delay: Duration) -> QueueResult<String> {
        if delay.is_zero() {
            return self.enqueue(job).await;
        }

        let mut conn = self.connection().await?;
        self.claim_dedup(&mut conn, job).await?;

        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let payload = serde_json::to_string(job)?;
        conn.zadd::<_, _, _, ()>(&self.config.delayed_set_name, &payload, due_ms)
            .await?;

        info!(
            job_id = %job.job_id(),
            kind = job.kind(),
            delay_secs = delay.as_secs(),
            "Scheduled delayed job"
        );
        Ok(job.job_id().to_string())
    }

    /// Move due delayed jobs into their streams. Returns how many moved.
    ///
    /// Safe to call from every worker: only the caller whose ZREM succeeds
    /// forwards a given job.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.delayed_set_name)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let removed: u32 = conn.zrem(&self.config.delayed_set_name, &payload).await?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<QueueJob>(&payload) {
                Ok(job) => {
                    let message_id = self.add_to_stream(&mut conn, &job).await?;
                    debug!(job_id = %job.job_id(), "Promoted delayed job as {}", message_id);
                    promoted += 1;
                }
                Err(e) => warn!("Dropping malformed delayed job: {}", e),
            }
        }

        Ok(promoted)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let stream = self.own_stream();

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved job {} to DLQ: {}", job.job_id(), error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(self.own_stream()).await?)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    /// Number of parked delayed jobs.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.zcard(&self.config.delayed_set_name).await?)
    }

    /// Read new jobs from this profile's stream.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(self.own_stream())
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry).await {
                    debug!("Consumed job {} from stream", job.job_id());
                    jobs.push((entry.id.clone(), job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs that have been idle for too long (crashed workers).
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;
        let stream = self.own_stream();

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&stale)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in result.ids {
            if let Some(job) = self.decode_entry(&entry).await {
                info!("Claimed pending job {} from stream", job.job_id());
                jobs.push((entry.id.clone(), job));
            }
        }

        Ok(jobs)
    }

    /// Reset the idle time of an entry this consumer is still working on,
    /// keeping it out of other workers' `claim_pending`.
    pub async fn heartbeat(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XCLAIM")
            .arg(self.own_stream())
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Refreshed claim on {}", message_id);
        Ok(())
    }

    /// Parse a stream entry; malformed entries are acked so they stop recurring.
    async fn decode_entry(&self, entry: &redis::streams::StreamId) -> Option<QueueJob> {
        let Some(redis::Value::BulkString(payload)) = entry.map.get("job") else {
            warn!("Stream entry {} has no job payload", entry.id);
            self.ack(&entry.id).await.ok();
            return None;
        };

        match serde_json::from_slice::<QueueJob>(payload) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Failed to parse job payload: {}", e);
                self.ack(&entry.id).await.ok();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ProcessVideoJob;
    use vpipe_models::{JobId, VideoId};

    #[test]
    fn test_stream_per_profile() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_for(ExecutionProfile::Standard), "vpipe:jobs:standard");
        assert_eq!(
            config.stream_for(ExecutionProfile::LargeMemory),
            "vpipe:jobs:large_memory"
        );
    }

    #[test]
    fn test_dedup_key() {
        let config = QueueConfig::default();
        let job = ProcessVideoJob {
            job_id: JobId::from_string("j1"),
            ..ProcessVideoJob::new(VideoId::from("v1"), [])
        };
        assert_eq!(
            config.dedup_key(&QueueJob::from(job).idempotency_key()),
            "vpipe:jobs:dedup:process:v1::auto:standard:j1:1"
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_delayed_job_promotion() {
        let config = QueueConfig {
            stream_name: format!("vpipe:test:{}", uuid::Uuid::new_v4()),
            ..QueueConfig::from_env()
        };
        let queue = JobQueue::new(config).unwrap();
        queue.init().await.unwrap();

        let job = QueueJob::from(ProcessVideoJob::all_steps(VideoId::new()));
        queue
            .enqueue_after(&job, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(queue.delayed_len().await.unwrap() >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(queue.promote_due(10).await.unwrap() >= 1);
        let consumed = queue.consume("test", 100, 10).await.unwrap();
        let (message_id, claimed) = consumed
            .into_iter()
            .find(|(_, j)| j.job_id() == job.job_id())
            .unwrap();

        queue.dlq(&message_id, &claimed, "test failure").await.unwrap();
        assert!(queue.dlq_len().await.unwrap() >= 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_heartbeat_keeps_running_job_unclaimable() {
        let config = QueueConfig {
            stream_name: format!("vpipe:test:{}", uuid::Uuid::new_v4()),
            ..QueueConfig::from_env()
        };
        let queue = JobQueue::new(config).unwrap();
        queue.init().await.unwrap();

        let job = QueueJob::from(ProcessVideoJob::all_steps(VideoId::new()));
        queue.enqueue(&job).await.unwrap();
        let consumed = queue.consume("busy", 100, 10).await.unwrap();
        let (message_id, _) = consumed
            .into_iter()
            .find(|(_, j)| j.job_id() == job.job_id())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.heartbeat("busy", &message_id).await.unwrap();

        let stolen = queue.claim_pending("other", 200, 10).await.unwrap();
        assert!(stolen.iter().all(|(id, _)| id != &message_id));

        queue.ack(&message_id).await.unwrap();
    }
}
