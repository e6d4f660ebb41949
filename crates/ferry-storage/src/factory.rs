#[cfg(feature = "storage-local")]
use crate::LocalBlobStore;
#[cfg(feature = "storage-s3")]
use crate::S3BlobStore;
use crate::{BlobStore, StorageBackend, StorageError, StorageResult};
use ferry_core::StorageConfig;
use std::sync::Arc;

/// Create a blob store backend based on configuration
pub async fn create_blob_store(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config.s3_region.clone().ok_or_else(|| {
                StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;

            let store = S3BlobStore::new(bucket, region, config.s3_endpoint.clone())?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;

            let store = LocalBlobStore::new(base_path).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
