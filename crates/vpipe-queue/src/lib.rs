//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job types for processing, reaping and deferred artifact cleanup
//! - Job enqueueing via Redis Streams, one stream per execution profile
//! - Delayed jobs backed by a sorted set
//! - Worker consumption with stale-claim recovery and DLQ
//! - The `JobDispatch` port with an in-memory implementation

pub mod dispatch;
pub mod error;
pub mod job;
pub mod queue;

pub use dispatch::{DispatchedJob, JobDispatch, MemoryDispatch};
pub use error::{QueueError, QueueResult};
pub use job::{PurgeArtifactsJob, QueueJob, ReapReason, ReapVideoJob, ProcessVideoJob};
pub use queue::{JobQueue, QueueConfig};
