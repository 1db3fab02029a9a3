//! Artifact storage over an S3-compatible object store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;
use tracing::{info, warn};

const ARTIFACT_CONTENT_TYPE: &str = "application/epub+zip";

#[derive(Debug, Error)]
#[error("object store error: {0}")]
pub struct StoreError(pub String);

/// Object-store operations the pipeline depends on.
///
/// Presigned URLs are minted per retrieval with a caller-supplied TTL and
/// never persisted. A cache hit presigns without a prior `stat`: if the
/// object was deleted behind our back the URL 404s at redirect time, which
/// we accept in exchange for one fewer round-trip per hit.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file under `{book_id}/{basename}`. Returns the object
    /// key and the uploaded size.
    async fn upload(&self, book_id: &str, local_path: &Path) -> Result<(String, i64), StoreError>;

    async fn stat(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Fallback lookup: first `.epub` object under the book's prefix.
    async fn find_artifact(&self, book_id: &str) -> Result<Option<(String, i64)>, StoreError>;

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub(crate) fn artifact_key(book_id: &str, local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book.epub".to_string());
    format!("{book_id}/{file_name}")
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub use_ssl: bool,
}

/// S3/MinIO-backed artifact store.
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    /// Build the client and ensure the bucket, best-effort: an existence
    /// check that fails for permission-like reasons is only a warning, but a
    /// bucket verified absent that cannot be created fails startup.
    pub async fn connect(config: S3Config) -> Result<Self, StoreError> {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{scheme}://{}", config.endpoint);

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "bindery",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);

        match client.head_bucket().bucket(&config.bucket).send().await {
            Ok(_) => info!(bucket = %config.bucket, "connected to object store"),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    client
                        .create_bucket()
                        .bucket(&config.bucket)
                        .send()
                        .await
                        .map_err(|e| {
                            StoreError(format!(
                                "bucket does not exist and cannot be created: {e}"
                            ))
                        })?;
                    info!(bucket = %config.bucket, "created bucket");
                } else {
                    warn!(
                        bucket = %config.bucket,
                        error = %err,
                        "could not verify bucket, assuming it exists"
                    );
                }
            }
        }

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn upload(&self, book_id: &str, local_path: &Path) -> Result<(String, i64), StoreError> {
        let key = artifact_key(book_id, local_path);
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| StoreError(format!("failed to read {}: {e}", local_path.display())))?;
        let size = bytes.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(ARTIFACT_CONTENT_TYPE)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError(format!("failed to upload {key}: {e}")))?;

        info!(key = %key, size, "artifact uploaded");
        Ok((key, size))
    }

    async fn stat(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0))),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(StoreError(format!("failed to stat {key}: {err}")))
                }
            }
        }
    }

    async fn find_artifact(&self, book_id: &str) -> Result<Option<(String, i64)>, StoreError> {
        let listing = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{book_id}/"))
            .send()
            .await
            .map_err(|e| StoreError(format!("failed to list {book_id}/: {e}")))?;

        for object in listing.contents() {
            let Some(key) = object.key() else { continue };
            if key.ends_with(".epub") {
                return Ok(Some((key.to_string(), object.size().unwrap_or(0))));
            }
        }
        Ok(None)
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError(format!("invalid presign ttl: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StoreError(format!("failed to presign {key}: {e}")))?;
        Ok(request.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError(format!("failed to delete {key}: {e}")))?;
        Ok(())
    }
}

/// In-memory store used by the pipeline and API tests.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the upload path.
    pub fn put_object(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.into(), bytes);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload(&self, book_id: &str, local_path: &Path) -> Result<(String, i64), StoreError> {
        let key = artifact_key(book_id, local_path);
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| StoreError(format!("failed to read {}: {e}", local_path.display())))?;
        let size = bytes.len() as i64;
        self.objects.lock().unwrap().insert(key.clone(), bytes);
        Ok((key, size))
    }

    async fn stat(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|b| b.len() as i64))
    }

    async fn find_artifact(&self, book_id: &str) -> Result<Option<(String, i64)>, StoreError> {
        let prefix = format!("{book_id}/");
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .find(|(key, _)| key.starts_with(&prefix) && key.ends_with(".epub"))
            .map(|(key, bytes)| (key.clone(), bytes.len() as i64)))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        // Mirrors the real store: presigning does not verify existence.
        Ok(format!(
            "memory://bindery/{key}?expires={}",
            ttl.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
