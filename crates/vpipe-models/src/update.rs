//! Partial updates to a video record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::storyboard::Storyboard;
use crate::video::{VideoRecord, VideoSource};

/// Derived fields written back by one job attempt.
///
/// `None` leaves the stored field untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct VideoUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<VideoSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_small_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_large_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyboard: Option<Storyboard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_complete: Option<bool>,
}

impl VideoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(mut self, sources: Vec<VideoSource>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_thumbnails(mut self, small: impl Into<String>, large: impl Into<String>) -> Self {
        self.thumbnail_small_key = Some(small.into());
        self.thumbnail_large_key = Some(large.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_storyboard(mut self, storyboard: Storyboard) -> Self {
        self.storyboard = Some(storyboard);
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = Some(bytes);
        self
    }

    pub fn with_processing_complete(mut self, complete: bool) -> Self {
        self.processing_complete = Some(complete);
        self
    }

    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Record field names this update touches (for update masks).
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.sources.is_some() {
            fields.push("sources");
        }
        if self.thumbnail_small_key.is_some() {
            fields.push("thumbnail_small_key");
        }
        if self.thumbnail_large_key.is_some() {
            fields.push("thumbnail_large_key");
        }
        if self.duration_secs.is_some() {
            fields.push("duration_secs");
        }
        if self.storyboard.is_some() {
            fields.push("storyboard");
        }
        if self.file_size_bytes.is_some() {
            fields.push("file_size_bytes");
        }
        if self.processing_complete.is_some() {
            fields.push("processing_complete");
        }
        fields
    }

    /// Merge into a record and stamp `updated_at`.
    pub fn apply_to(&self, record: &mut VideoRecord, now: DateTime<Utc>) {
        if let Some(sources) = &self.sources {
            record.sources = sources.clone();
        }
        if let Some(key) = &self.thumbnail_small_key {
            record.thumbnail_small_key = Some(key.clone());
        }
        if let Some(key) = &self.thumbnail_large_key {
            record.thumbnail_large_key = Some(key.clone());
        }
        if let Some(secs) = self.duration_secs {
            record.duration_secs = Some(secs);
        }
        if let Some(storyboard) = &self.storyboard {
            record.storyboard = Some(storyboard.clone());
        }
        if let Some(bytes) = self.file_size_bytes {
            record.file_size_bytes = bytes;
        }
        if let Some(complete) = self.processing_complete {
            record.processing_complete = complete;
        }
        record.updated_at = now;
    }
}
