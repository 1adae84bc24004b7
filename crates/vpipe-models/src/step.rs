//! Processing steps a job can request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A derivation step of the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    /// Record the native file size
    Size,
    /// Poster images
    Thumbnails,
    /// Scrub-bar sprite sheet
    Storyboard,
    /// Duration probe
    Duration,
    /// Resolution ladder
    Transcode,
}

/// Ordered, de-duplicated set of requested steps.
pub type StepSet = BTreeSet<ProcessingStep>;

impl ProcessingStep {
    /// Every step, in execution order.
    pub const ALL: [ProcessingStep; 5] = [
        ProcessingStep::Size,
        ProcessingStep::Thumbnails,
        ProcessingStep::Storyboard,
        ProcessingStep::Duration,
        ProcessingStep::Transcode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Size => "size",
            ProcessingStep::Thumbnails => "thumbnails",
            ProcessingStep::Storyboard => "storyboard",
            ProcessingStep::Duration => "duration",
            ProcessingStep::Transcode => "transcode",
        }
    }

    /// Full step set.
    pub fn all() -> StepSet {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown step name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown processing step: {0}")]
pub struct ParseStepError(pub String);

impl FromStr for ProcessingStep {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "size" => Ok(ProcessingStep::Size),
            "thumbnails" => Ok(ProcessingStep::Thumbnails),
            "storyboard" => Ok(ProcessingStep::Storyboard),
            "duration" => Ok(ProcessingStep::Duration),
            "transcode" => Ok(ProcessingStep::Transcode),
            other => Err(ParseStepError(other.to_string())),
        }
    }
}
