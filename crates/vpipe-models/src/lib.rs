//! Shared data models for the vpipe video pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their sources
//! - Storyboard manifests
//! - Processing steps and job results
//! - Account plan tiers and transcode quality policy
//! - Deterministic derived-artifact keys

pub mod encoding;
pub mod job;
pub mod keys;
pub mod plan;
pub mod step;
pub mod storyboard;
pub mod update;
pub mod video;

// Re-export common types
pub use encoding::EncodingConfig;
pub use job::{ExecutionProfile, JobId, JobResult};
pub use plan::{AccountUsage, PlanTier};
pub use step::{ParseStepError, ProcessingStep, StepSet};
pub use storyboard::{Storyboard, StoryboardTile};
pub use update::VideoUpdate;
pub use video::{StorageBackend, VideoId, VideoRecord, VideoSource};
