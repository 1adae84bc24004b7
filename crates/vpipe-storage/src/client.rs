//! S3-compatible client implementation.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// DeleteObjects accepts at most this many keys per request.
const MAX_DELETE_BATCH: usize = 1000;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (R2, MinIO); `None` uses AWS
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Native uploads and transcoded rungs
    pub video_bucket: String,
    /// Posters and storyboard sprites
    pub thumbnail_bucket: String,
    /// Path-style addressing (required by most non-AWS endpoints)
    pub force_path_style: bool,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint_url = std::env::var("S3_ENDPOINT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let force_path_style = std::env::var("S3_FORCE_PATH_STYLE")
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(endpoint_url.is_some());

        Ok(Self {
            endpoint_url,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            video_bucket: std::env::var("S3_VIDEO_BUCKET")
                .map_err(|_| StorageError::config_error("S3_VIDEO_BUCKET not set"))?,
            thumbnail_bucket: std::env::var("S3_THUMBNAIL_BUCKET")
                .map_err(|_| StorageError::config_error("S3_THUMBNAIL_BUCKET not set"))?,
            force_path_style,
        })
    }
}

/// S3-compatible storage client scoped to one region/endpoint.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vpipe",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Upload a file.
    pub async fn upload_file(
        &self,
        bucket: &str,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!("Uploading {} to {}/{}", path.display(), bucket, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key, StorageError::UploadFailed))?;

        info!("Uploaded {} to {}/{}", path.display(), bucket, key);
        Ok(())
    }

    /// Upload bytes.
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}/{}", data.len(), bucket, key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key, StorageError::UploadFailed))?;

        Ok(())
    }

    /// Stream an object to a local file. Returns the number of bytes written.
    pub async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        path: impl AsRef<Path>,
    ) -> StorageResult<u64> {
        let path = path.as_ref();
        debug!("Downloading {}/{} to {}", bucket, key, path.display());

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key, StorageError::DownloadFailed))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut body = response.body.into_async_read();
        let written = tokio::io::copy(&mut body, &mut file).await.map_err(|e| {
            StorageError::transient(format!("download of {key} interrupted: {e}"))
        })?;
        file.flush().await?;

        info!("Downloaded {}/{} ({} bytes)", bucket, key, written);
        Ok(written)
    }

    /// Delete the current version of each key (a delete marker on versioned buckets).
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<u32> {
        let ids = keys
            .iter()
            .map(|k| object_identifier(k, None))
            .collect::<StorageResult<Vec<_>>>()?;
        self.delete_identifiers(bucket, ids).await
    }

    /// Delete every historical version and delete marker of `key`.
    ///
    /// A key with no versions is not an error.
    pub async fn delete_all_versions(&self, bucket: &str, key: &str) -> StorageResult<u32> {
        let versions = self.list_versions(bucket, key).await?;
        if versions.is_empty() {
            debug!("No versions of {}/{} to delete", bucket, key);
            return Ok(0);
        }

        let ids = versions
            .iter()
            .map(|v| object_identifier(key, Some(v)))
            .collect::<StorageResult<Vec<_>>>()?;
        let deleted = self.delete_identifiers(bucket, ids).await?;

        info!("Deleted {} versions of {}/{}", deleted, bucket, key);
        Ok(deleted)
    }

    /// Version IDs (including delete markers) stored under exactly `key`.
    async fn list_versions(&self, bucket: &str, key: &str) -> StorageResult<Vec<String>> {
        let mut version_ids = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .prefix(key);

            if let Some(marker) = key_marker.take() {
                request = request.key_marker(marker);
            }
            if let Some(marker) = version_marker.take() {
                request = request.version_id_marker(marker);
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key, StorageError::ListFailed))?;

            // Prefix listing also returns longer keys such as `{key}-720p.mp4`.
            for version in response.versions() {
                if version.key() == Some(key) {
                    if let Some(id) = version.version_id() {
                        version_ids.push(id.to_string());
                    }
                }
            }
            for marker in response.delete_markers() {
                if marker.key() == Some(key) {
                    if let Some(id) = marker.version_id() {
                        version_ids.push(id.to_string());
                    }
                }
            }

            if response.is_truncated() == Some(true) {
                key_marker = response.next_key_marker().map(str::to_string);
                version_marker = response.next_version_id_marker().map(str::to_string);
                if key_marker.is_none() && version_marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(version_ids)
    }

    async fn delete_identifiers(
        &self,
        bucket: &str,
        ids: Vec<ObjectIdentifier>,
    ) -> StorageResult<u32> {
        let mut deleted = 0u32;

        for chunk in ids.chunks(MAX_DELETE_BATCH) {
            let delete = Delete::builder()
                .set_objects(Some(chunk.to_vec()))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, bucket, StorageError::DeleteFailed))?;

            let mut failures = 0u32;
            for err in response.errors() {
                match err.code() {
                    Some("NoSuchKey") | Some("NoSuchVersion") => {}
                    code => {
                        failures += 1;
                        warn!(
                            key = err.key().unwrap_or_default(),
                            code = code.unwrap_or_default(),
                            "failed to delete object: {}",
                            err.message().unwrap_or_default()
                        );
                    }
                }
            }
            if failures > 0 {
                return Err(StorageError::delete_failed(format!(
                    "{failures} objects could not be deleted from {bucket}"
                )));
            }

            deleted += chunk.len() as u32;
        }

        Ok(deleted)
    }

    /// Check if an object exists.
    pub async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, key, StorageError::AwsSdk) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    /// Check connectivity by performing a head bucket operation on both buckets.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        for bucket in [&self.config.video_bucket, &self.config.thumbnail_bucket] {
            self.client
                .head_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| {
                    StorageError::AwsSdk(format!(
                        "connectivity check for {bucket} failed: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;
        }
        Ok(())
    }
}

fn object_identifier(key: &str, version_id: Option<&String>) -> StorageResult<ObjectIdentifier> {
    ObjectIdentifier::builder()
        .key(key)
        .set_version_id(version_id.cloned())
        .build()
        .map_err(|e| StorageError::delete_failed(e.to_string()))
}

/// Classify an SDK failure: missing objects, transient failures, or the
/// operation-specific error built by `other`.
fn map_sdk_error<E>(
    err: SdkError<E, HttpResponse>,
    key: &str,
    other: fn(String) -> StorageError,
) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::transient(message)
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let code = ctx.err().code();
            if status == 404 || matches!(code, Some("NoSuchKey" | "NotFound" | "NoSuchVersion")) {
                StorageError::not_found(key)
            } else if status >= 500 || status == 429 || code == Some("SlowDown") {
                StorageError::transient(message)
            } else {
                other(message)
            }
        }
        _ => other(message),
    }
}
