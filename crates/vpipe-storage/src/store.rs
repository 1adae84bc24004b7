//! Object store port used by the pipeline.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::client::S3Client;
use crate::error::StorageResult;

/// Logical bucket an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Native uploads and transcoded rungs
    Videos,
    /// Posters and storyboard sprites
    Thumbnails,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Videos => "videos",
            Bucket::Thumbnails => "thumbnails",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable storage for native files and derived artifacts.
///
/// `publish` is at-least-once: re-publishing the same key with the same bytes
/// is harmless. `delete` tolerates keys that do not exist.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the native upload to `dest`, returning its size in bytes.
    async fn fetch_native(&self, key: &str, dest: &Path) -> StorageResult<u64>;

    /// Store an in-memory artifact.
    async fn publish(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Store an artifact from a local file.
    async fn publish_file(
        &self,
        bucket: Bucket,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Delete keys. With `all_versions`, every historical version goes too.
    /// Returns the number of object versions removed.
    async fn delete(&self, bucket: Bucket, keys: &[String], all_versions: bool)
        -> StorageResult<u32>;
}

impl S3Client {
    fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Videos => &self.config().video_bucket,
            Bucket::Thumbnails => &self.config().thumbnail_bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn fetch_native(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        self.download_file(self.bucket_name(Bucket::Videos), key, dest)
            .await
    }

    async fn publish(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.upload_bytes(self.bucket_name(bucket), bytes, key, content_type)
            .await
    }

    async fn publish_file(
        &self,
        bucket: Bucket,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        self.upload_file(self.bucket_name(bucket), path, key, content_type)
            .await
    }

    async fn delete(
        &self,
        bucket: Bucket,
        keys: &[String],
        all_versions: bool,
    ) -> StorageResult<u32> {
        let bucket_name = self.bucket_name(bucket);
        if !all_versions {
            return self.delete_objects(bucket_name, keys).await;
        }

        let mut deleted = 0;
        for key in keys {
            deleted += self.delete_all_versions(bucket_name, key).await?;
        }
        debug!(bucket = %bucket, keys = keys.len(), deleted, "deleted all versions");
        Ok(deleted)
    }
}
