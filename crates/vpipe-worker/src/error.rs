//! Worker error types.

use std::time::Duration;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache invalidation failed: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vpipe_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] vpipe_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] vpipe_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vpipe_queue::QueueError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Transient failures worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Timeout(_) | WorkerError::Io(_) | WorkerError::Cache(_) => true,
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Firestore(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Redis(e) => e.is_io_error() || e.is_timeout(),
            WorkerError::JobFailed(_) | WorkerError::ConfigError(_) => false,
        }
    }

    /// The attempt ran out of memory and belongs on a larger profile.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_resource_exhausted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_media::MediaError;

    #[test]
    fn test_classification() {
        assert!(WorkerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!WorkerError::job_failed("bad").is_retryable());

        let oom = WorkerError::from(MediaError::ResourceExhausted("killed".into()));
        assert!(oom.is_resource_exhausted());
        assert!(!WorkerError::job_failed("x").is_resource_exhausted());
    }
}
