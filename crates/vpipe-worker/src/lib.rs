//! Video processing worker.
//!
//! This crate provides:
//! - The job orchestrator that turns a native upload into posters, a
//!   storyboard, a duration and a resolution ladder
//! - The deletion reaper and deferred rung cleanup
//! - The record writer and its cache invalidation port
//! - The queue executor with retry, escalation and graceful shutdown

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod reaper;
pub mod retry;
pub mod state;
pub mod toolkit;
pub mod workdir;
pub mod writer;

pub use cache::{CacheInvalidator, RecordingCache, RedisCache};
pub use config::WorkerConfig;
pub use context::PipelinePorts;
pub use error::{WorkerError, WorkerResult};
pub use executor::{plan_failure, Disposition, FailurePlan, JobExecutor, JobRunner};
pub use logging::{JobLogger, Outcome, PipelineEvent};
pub use orchestrator::{JobOutcome, Pipeline};
pub use reaper::{ReapOutcome, Reaper};
pub use state::{PipelineState, StateTracker};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use writer::RecordWriter;
