//! Account tiers and storage usage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Account service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Premium,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown values map to `Free`.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pro" => PlanTier::Pro,
            "premium" => PlanTier::Premium,
            _ => PlanTier::Free,
        }
    }

    /// Get the tier name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Premium => "premium",
        }
    }

    /// Whether the transcode ladder runs for this tier.
    ///
    /// The lowest tier only gets a ladder when explicitly forced.
    pub fn allows_transcoding(&self, force: bool) -> bool {
        force || !matches!(self, PlanTier::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage accounting for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct AccountUsage {
    pub account_id: String,
    #[serde(default)]
    pub tier: PlanTier,
    #[serde(default)]
    pub storage_used_bytes: u64,
}

impl AccountUsage {
    pub fn new(account_id: impl Into<String>, tier: PlanTier, storage_used_bytes: u64) -> Self {
        Self {
            account_id: account_id.into(),
            tier,
            storage_used_bytes,
        }
    }

    /// Subtract a deleted video's size, floored at zero.
    pub fn release(&mut self, bytes: u64) {
        self.storage_used_bytes = self.storage_used_bytes.saturating_sub(bytes);
    }
}
