//! Video record store.
//!
//! The pipeline reads records, merges derived fields into them and (for
//! expired videos) deletes them. Everything else about a record is owned by
//! the upload/API side.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use vpipe_models::{VideoId, VideoRecord, VideoUpdate};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{json_to_value, to_fields, Precondition};

/// Collection holding one document per video, keyed by video ID.
pub const VIDEOS_COLLECTION: &str = "videos";

/// Read/write access to video records.
#[async_trait]
pub trait VideoRecordStore: Send + Sync {
    /// `None` when the record does not exist.
    async fn read(&self, id: &VideoId) -> FirestoreResult<Option<VideoRecord>>;

    /// Merge `update` into the record. Never recreates a deleted record;
    /// returns `None` instead.
    async fn update(&self, id: &VideoId, update: &VideoUpdate)
        -> FirestoreResult<Option<VideoRecord>>;

    async fn exists(&self, id: &VideoId) -> FirestoreResult<bool> {
        Ok(self.read(id).await?.is_some())
    }

    /// Remove the record. Missing records are not an error.
    async fn delete(&self, id: &VideoId) -> FirestoreResult<()>;
}

/// Firestore-backed [`VideoRecordStore`].
#[derive(Clone)]
pub struct VideoRepository {
    client: FirestoreClient,
    collection: String,
}

impl VideoRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self::with_collection(client, VIDEOS_COLLECTION)
    }

    pub fn with_collection(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl VideoRecordStore for VideoRepository {
    async fn read(&self, id: &VideoId) -> FirestoreResult<Option<VideoRecord>> {
        let doc = self
            .client
            .with_retry("read_video", || {
                self.client.get_document(&self.collection, id.as_str())
            })
            .await?;

        doc.map(|d| d.decode::<VideoRecord>()).transpose()
    }

    async fn update(
        &self,
        id: &VideoId,
        update: &VideoUpdate,
    ) -> FirestoreResult<Option<VideoRecord>> {
        if update.is_empty() {
            return self.read(id).await;
        }

        let mut fields = to_fields(update)?;
        fields.insert(
            "updated_at".to_string(),
            json_to_value(&serde_json::to_value(Utc::now())?),
        );

        let mut mask: Vec<String> = update.field_names().iter().map(|f| f.to_string()).collect();
        mask.push("updated_at".to_string());

        let precondition = Precondition::exists();
        let result = self
            .client
            .with_retry("update_video", || {
                self.client.update_document(
                    &self.collection,
                    id.as_str(),
                    fields.clone(),
                    &mask,
                    Some(&precondition),
                )
            })
            .await;

        match result {
            Ok(doc) => {
                debug!(video_id = %id, fields = ?mask, "Updated video record");
                Ok(Some(doc.decode()?))
            }
            Err(e) if e.is_not_found() => {
                debug!(video_id = %id, "Video record vanished before update");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
        self.client
            .with_retry("delete_video", || {
                self.client.delete_document(&self.collection, id.as_str())
            })
            .await
    }
}
