use crate::keys::validate_destination_key;
use crate::traits::{BlobStore, BlobWriter, StorageError, StorageResult, WriteAck};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use ferry_core::constants::MIN_CHUNK_SIZE_BYTES;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{MultipartUpload, ObjectStore, ObjectStoreExt, PutPayload};
use std::sync::Arc;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3BlobStore {
    store: Arc<AmazonS3>,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3BlobStore instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub fn new(bucket: String, region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        // Credentials come from the standard AWS environment variables.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3BlobStore {
            store: Arc::new(store),
            bucket,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn open_write(&self, destination_key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        validate_destination_key(destination_key)?;
        let location = Path::from(destination_key.to_string());

        let upload = self
            .store
            .put_multipart_opts(&location, Default::default())
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %destination_key,
                    "S3 multipart initiation failed"
                );
                StorageError::WriteFailed(e.to_string())
            })?;

        Ok(Box::new(S3BlobWriter {
            store: Arc::clone(&self.store),
            bucket: self.bucket.clone(),
            key: destination_key.to_string(),
            location,
            upload: Some(upload),
            pending: BytesMut::new(),
            parts: 0,
            bytes_written: 0,
            started: std::time::Instant::now(),
        }))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

/// Streams chunks into an S3 multipart upload.
///
/// S3 rejects non-final parts under 5 MiB, so small chunks are coalesced until
/// the threshold is reached. Peak memory stays under one chunk plus one part.
struct S3BlobWriter {
    store: Arc<AmazonS3>,
    bucket: String,
    key: String,
    location: Path,
    upload: Option<Box<dyn MultipartUpload>>,
    pending: BytesMut,
    parts: usize,
    bytes_written: u64,
    started: std::time::Instant,
}

impl S3BlobWriter {
    fn closed(&self) -> StorageError {
        StorageError::WriteFailed(format!("writer for {} is already closed", self.key))
    }

    async fn flush_part(&mut self) -> StorageResult<()> {
        let part = self.pending.split().freeze();
        let upload = match self.upload.as_mut() {
            Some(upload) => upload,
            None => return Err(self.closed()),
        };
        let len = part.len();
        upload
            .put_part(PutPayload::from(part))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.parts += 1;
        tracing::trace!(key = %self.key, part = self.parts, size_bytes = len, "S3 part uploaded");
        Ok(())
    }
}

#[async_trait]
impl BlobWriter for S3BlobWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        if self.upload.is_none() {
            return Err(self.closed());
        }
        self.bytes_written += chunk.len() as u64;
        self.pending.extend_from_slice(&chunk);
        if self.pending.len() >= MIN_CHUNK_SIZE_BYTES {
            self.flush_part().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<WriteAck> {
        if self.upload.is_none() {
            return Err(self.closed());
        }

        if self.parts == 0 && self.pending.is_empty() {
            // Multipart uploads need at least one part; store an empty object instead.
            if let Some(mut upload) = self.upload.take() {
                let _ = upload.abort().await;
            }
            self.store
                .put(&self.location, PutPayload::default())
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        } else {
            if !self.pending.is_empty() {
                self.flush_part().await?;
            }
            let mut upload = match self.upload.take() {
                Some(upload) => upload,
                None => return Err(self.closed()),
            };
            if let Err(e) = upload.complete().await {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %self.key,
                    parts = self.parts,
                    "S3 multipart completion failed"
                );
                let _ = upload.abort().await;
                return Err(StorageError::WriteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %self.key,
            size_bytes = self.bytes_written,
            parts = self.parts,
            duration_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(WriteAck {
            key: self.key.clone(),
            bytes_written: self.bytes_written,
        })
    }

    async fn abort(&mut self) -> StorageResult<()> {
        self.pending.clear();
        if let Some(mut upload) = self.upload.take() {
            upload.abort().await.map_err(|e| {
                tracing::warn!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %self.key,
                    "S3 multipart abort failed"
                );
                StorageError::BackendError(e.to_string())
            })?;
        }
        Ok(())
    }
}
