//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vpipe_models::ExecutionProfile;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wall-clock budget for one job attempt
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Root for per-job working directories
    pub work_dir: PathBuf,
    /// Attempts per job before it is dead-lettered
    pub max_attempts: u32,
    /// First retry delay; doubles with every attempt
    pub retry_base_delay: Duration,
    /// Delay before rungs dropped by a re-run are purged
    pub cleanup_delay: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often a running job refreshes its stream claim
    pub job_heartbeat_interval: Duration,
    /// How often due delayed jobs are moved onto their streams
    pub promote_interval: Duration,
    /// Per-rung transcoder timeout
    pub transcode_timeout: Option<Duration>,
    /// Execution profile this process serves
    pub profile: ExecutionProfile,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/vpipe"),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(30),
            cleanup_delay: Duration::from_secs(3600),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            job_heartbeat_interval: Duration::from_secs(30),
            promote_interval: Duration::from_secs(5),
            transcode_timeout: None,
            profile: ExecutionProfile::Standard,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_attempts: env_parse::<u32>("WORKER_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retry_base_delay: env_secs("WORKER_RETRY_BASE_SECS")
                .unwrap_or(defaults.retry_base_delay),
            cleanup_delay: env_secs("WORKER_CLEANUP_DELAY_SECS").unwrap_or(defaults.cleanup_delay),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS")
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS")
                .unwrap_or(defaults.claim_min_idle),
            job_heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.job_heartbeat_interval),
            promote_interval: env_secs("WORKER_PROMOTE_INTERVAL_SECS")
                .unwrap_or(defaults.promote_interval),
            transcode_timeout: env_secs("WORKER_TRANSCODE_TIMEOUT"),
            profile: std::env::var("WORKER_PROFILE")
                .map(|p| ExecutionProfile::from_str(&p))
                .unwrap_or(defaults.profile),
        }
    }

    /// Backoff before retry number `attempt` (1-based attempt that failed).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.retry_base_delay.saturating_mul(1u32 << exponent)
    }

    /// Effective heartbeat period for running jobs.
    ///
    /// Capped at a third of `claim_min_idle` so a live job is refreshed
    /// several times before the claim loop would consider it orphaned.
    pub fn heartbeat_interval(&self) -> Duration {
        let ceiling = (self.claim_min_idle / 3).max(Duration::from_secs(1));
        self.job_heartbeat_interval.clamp(Duration::from_secs(1), ceiling)
    }
}
