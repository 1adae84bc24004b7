//! Versioned in-memory object store for tests and local runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::store::{Bucket, ObjectStore};

/// One stored version of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Behaves like a bucket with versioning enabled.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(Bucket, String), Vec<StoredObject>>>,
    failing_keys: Mutex<HashSet<String>>,
    undeletable_keys: Mutex<HashSet<String>>,
    publishes: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version without counting it as a publish.
    pub async fn seed(&self, bucket: Bucket, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .await
            .entry((bucket, key.to_string()))
            .or_default()
            .push(StoredObject {
                bytes: bytes.into(),
                content_type: "application/octet-stream".to_string(),
            });
    }

    /// Make every publish to `key` fail with an upload error.
    pub async fn fail_publishes_to(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    /// Make every delete that names `key` fail before touching any object.
    pub async fn fail_deletes_to(&self, key: &str) {
        self.undeletable_keys.lock().await.insert(key.to_string());
    }

    /// Latest version of an object.
    pub async fn get(&self, bucket: Bucket, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .await
            .get(&(bucket, key.to_string()))
            .and_then(|versions| versions.last().cloned())
    }

    pub async fn version_count(&self, bucket: Bucket, key: &str) -> usize {
        self.objects
            .lock()
            .await
            .get(&(bucket, key.to_string()))
            .map_or(0, Vec::len)
    }

    /// Keys with at least one version in `bucket`.
    pub async fn keys(&self, bucket: Bucket) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(b, _)| *b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Number of successful publishes so far.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    async fn put(&self, bucket: Bucket, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        if self.failing_keys.lock().await.contains(key) {
            return Err(StorageError::upload_failed(format!("injected failure for {key}")));
        }

        self.objects
            .lock()
            .await
            .entry((bucket, key.to_string()))
            .or_default()
            .push(StoredObject {
                bytes,
                content_type: content_type.to_string(),
            });
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch_native(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let object = self
            .get(Bucket::Videos, key)
            .await
            .ok_or_else(|| StorageError::not_found(key))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &object.bytes).await?;
        Ok(object.bytes.len() as u64)
    }

    async fn publish(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.put(bucket, key, bytes, content_type).await
    }

    async fn publish_file(
        &self,
        bucket: Bucket,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        let bytes = tokio::fs::read(path).await?;
        self.put(bucket, key, bytes, content_type).await
    }

    async fn delete(
        &self,
        bucket: Bucket,
        keys: &[String],
        all_versions: bool,
    ) -> StorageResult<u32> {
        {
            let undeletable = self.undeletable_keys.lock().await;
            if let Some(key) = keys.iter().find(|k| undeletable.contains(*k)) {
                return Err(StorageError::delete_failed(format!("injected failure for {key}")));
            }
        }

        let mut objects = self.objects.lock().await;
        let mut deleted = 0u32;

        for key in keys {
            let map_key = (bucket, key.clone());
            let Some(versions) = objects.get_mut(&map_key) else {
                continue;
            };

            if all_versions {
                deleted += versions.len() as u32;
                objects.remove(&map_key);
            } else {
                versions.pop();
                deleted += 1;
                if versions.is_empty() {
                    objects.remove(&map_key);
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_all_versions() {
        let store = MemoryObjectStore::new();
        for i in 0..3 {
            store.seed(Bucket::Videos, "native", vec![i]).await;
        }
        store.seed(Bucket::Videos, "native-720p.mp4", vec![9]).await;

        assert_eq!(store.version_count(Bucket::Videos, "native").await, 3);

        let deleted = store
            .delete(Bucket::Videos, &["native".to_string(), "missing".to_string()], true)
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(store.version_count(Bucket::Videos, "native").await, 0);
        assert_eq!(store.version_count(Bucket::Videos, "native-720p.mp4").await, 1);
    }

    #[tokio::test]
    async fn test_injected_delete_failure_leaves_objects() {
        let store = MemoryObjectStore::new();
        store.seed(Bucket::Thumbnails, "a", vec![1]).await;
        store.seed(Bucket::Thumbnails, "b", vec![2]).await;
        store.fail_deletes_to("b").await;

        let result = store
            .delete(Bucket::Thumbnails, &["a".to_string(), "b".to_string()], false)
            .await;

        assert!(matches!(result, Err(StorageError::DeleteFailed(_))));
        assert!(store.get(Bucket::Thumbnails, "a").await.is_some());
        assert!(store.get(Bucket::Thumbnails, "b").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_current_version_only() {
        let store = MemoryObjectStore::new();
        store.seed(Bucket::Thumbnails, "k", vec![1]).await;
        store.seed(Bucket::Thumbnails, "k", vec![2]).await;

        store
            .delete(Bucket::Thumbnails, &["k".to_string()], false)
            .await
            .unwrap();

        let latest = store.get(Bucket::Thumbnails, "k").await.unwrap();
        assert_eq!(latest.bytes, vec![1]);
    }

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let store = MemoryObjectStore::new();
        store
            .publish(Bucket::Videos, "a", b"video".to_vec(), "video/mp4")
            .await
            .unwrap();
        assert_eq!(store.publish_count(), 1);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("native");
        let size = store.fetch_native("a", &dest).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"video");

        let err = store.fetch_native("b", &dest).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryObjectStore::new();
        store.fail_publishes_to("bad").await;
        assert!(store
            .publish(Bucket::Videos, "bad", vec![1], "video/mp4")
            .await
            .is_err());
        assert_eq!(store.publish_count(), 0);
    }
}
