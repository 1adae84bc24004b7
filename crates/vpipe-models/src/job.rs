//! Job identity, execution profiles and job results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::step::ProcessingStep;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker class a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProfile {
    #[default]
    Standard,
    /// Workers provisioned with more memory, used after an OOM.
    LargeMemory,
}

impl ExecutionProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProfile::Standard => "standard",
            ExecutionProfile::LargeMemory => "large_memory",
        }
    }

    /// Parse from string (case-insensitive). Unknown values map to `Standard`.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "large_memory" | "large" => ExecutionProfile::LargeMemory,
            _ => ExecutionProfile::Standard,
        }
    }

    /// Next larger profile, or `None` when already at the largest.
    pub fn escalate(&self) -> Option<Self> {
        match self {
            ExecutionProfile::Standard => Some(ExecutionProfile::LargeMemory),
            ExecutionProfile::LargeMemory => None,
        }
    }
}

impl fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result contract of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub failed_steps: Vec<ProcessingStep>,
}

impl JobResult {
    /// Build from the steps that failed; success means none did.
    pub fn from_failures(mut failed_steps: Vec<ProcessingStep>) -> Self {
        failed_steps.sort();
        failed_steps.dedup();
        Self {
            success: failed_steps.is_empty(),
            failed_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_profile_escalation() {
        assert_eq!(
            ExecutionProfile::Standard.escalate(),
            Some(ExecutionProfile::LargeMemory)
        );
        assert_eq!(ExecutionProfile::LargeMemory.escalate(), None);
        assert_eq!(
            ExecutionProfile::from_str("large-memory"),
            ExecutionProfile::LargeMemory
        );
    }

    #[test]
    fn test_job_result_contract() {
        let ok = JobResult::from_failures(vec![]);
        assert!(ok.success);

        let partial = JobResult::from_failures(vec![
            ProcessingStep::Transcode,
            ProcessingStep::Storyboard,
            ProcessingStep::Transcode,
        ]);
        assert!(!partial.success);
        assert_eq!(
            partial.failed_steps,
            vec![ProcessingStep::Storyboard, ProcessingStep::Transcode]
        );

        let json = serde_json::to_value(&partial).unwrap();
        assert_eq!(json["failedSteps"][0], "storyboard");
    }
}
