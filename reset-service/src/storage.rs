//! Object storage used to fetch nuke templates.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use service_core::error::AppError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::fs;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AppError>;

    /// Writes the object to `path`, creating parent directories.
    async fn download(&self, bucket: &str, key: &str, path: &Path) -> Result<(), AppError> {
        let data = self.get_object(bucket, key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }
}

pub struct S3ObjectStorage {
    client: S3Client,
}

impl S3ObjectStorage {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AppError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "S3 GetObject s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(e)
                ))
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("S3 body collection failed: {}", e)))?
            .into_bytes()
            .to_vec();
        tracing::debug!(bucket = %bucket, key = %key, bytes = data.len(), "Fetched object");
        Ok(data)
    }
}

/// In-process bucket contents keyed by `(bucket, key)`.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), data.into());
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AppError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("object map lock poisoned")))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("object s3://{}/{} not found", bucket, key))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_writes_object_to_path() {
        let storage = MemoryObjectStorage::new();
        storage.put("templates", "nuke/default.yml", "regions: [us-east-1]\n");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yml");

        storage.download("templates", "nuke/default.yml", &path).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "regions: [us-east-1]\n");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = MemoryObjectStorage::new();
        let err = storage.get_object("templates", "absent.yml").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
