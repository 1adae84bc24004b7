//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storyboard::Storyboard;

/// Opaque identifier of an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
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

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which storage backend holds a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3-compatible object storage
    #[default]
    S3,
    /// Cloudflare R2 (S3 API, different endpoint)
    R2,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::S3 => "s3",
            StorageBackend::R2 => "r2",
        }
    }
}

/// One playable rendition of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoSource {
    /// Object key in the video bucket
    pub key: String,
    /// Container mime type (e.g. "video/mp4")
    pub mime_type: String,
    /// Width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Measured bitrate in bits/second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    /// True only for the original upload
    #[serde(default)]
    pub is_native: bool,
    /// Storage backend
    #[serde(default)]
    pub backend: StorageBackend,
}

impl VideoSource {
    /// Source entry for the original upload.
    pub fn native(key: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mime_type: mime_type.into(),
            width: None,
            height: None,
            bitrate: None,
            is_native: true,
            backend: StorageBackend::default(),
        }
    }

    /// Source entry for a transcoded rung.
    pub fn transcoded(
        key: impl Into<String>,
        mime_type: impl Into<String>,
        width: u32,
        height: u32,
        bitrate: Option<u64>,
    ) -> Self {
        Self {
            key: key.into(),
            mime_type: mime_type.into(),
            width: Some(width),
            height: Some(height),
            bitrate,
            is_native: false,
            backend: StorageBackend::default(),
        }
    }

    /// Set resolution.
    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set measured bitrate.
    pub fn with_bitrate(mut self, bitrate: Option<u64>) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// Video record as persisted by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub id: VideoId,

    /// Video title
    #[serde(default)]
    pub title: String,

    /// Owning account ID
    pub owner_id: String,

    /// Key of the native upload in the video bucket
    pub native_key: String,

    /// Native file size in bytes
    #[serde(default)]
    pub file_size_bytes: u64,

    /// Duration in seconds (set once probed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    /// Hidden from public listings
    #[serde(default)]
    pub is_private: bool,

    /// Flipped once the pipeline finished its first run
    #[serde(default)]
    pub processing_complete: bool,

    /// Native source followed by transcoded rungs, tallest first
    #[serde(default)]
    pub sources: Vec<VideoSource>,

    /// Scrub-bar storyboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyboard: Option<Storyboard>,

    /// Small poster key in the thumbnail bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_small_key: Option<String>,

    /// Large poster key in the thumbnail bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_large_key: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the video expires and should be reaped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
}

impl VideoRecord {
    /// Create a freshly uploaded record with only its native source.
    pub fn new(
        id: VideoId,
        owner_id: impl Into<String>,
        native_key: impl Into<String>,
        file_size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        let native_key = native_key.into();
        Self {
            id,
            title: String::new(),
            owner_id: owner_id.into(),
            sources: vec![VideoSource::native(native_key.clone(), "video/mp4")],
            native_key,
            file_size_bytes,
            duration_secs: None,
            is_private: false,
            processing_complete: false,
            storyboard: None,
            thumbnail_small_key: None,
            thumbnail_large_key: None,
            created_at: now,
            updated_at: now,
            scheduled_deletion_at: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The original upload, if recorded.
    pub fn native_source(&self) -> Option<&VideoSource> {
        self.sources.iter().find(|s| s.is_native)
    }

    /// Sources produced by the transcoder.
    pub fn transcoded_sources(&self) -> impl Iterator<Item = &VideoSource> {
        self.sources.iter().filter(|s| !s.is_native)
    }

    /// Keys of the transcoded sources.
    pub fn transcoded_keys(&self) -> Vec<String> {
        self.transcoded_sources().map(|s| s.key.clone()).collect()
    }

    /// Whether any source or poster references the given key.
    pub fn references_key(&self, key: &str) -> bool {
        self.sources.iter().any(|s| s.key == key)
            || self.thumbnail_small_key.as_deref() == Some(key)
            || self.thumbnail_large_key.as_deref() == Some(key)
    }

    /// True if an expiry is set and has passed.
    pub fn is_due_for_deletion(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_deletion_at.is_some_and(|at| at <= now)
    }
}
