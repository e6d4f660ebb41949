use crate::keys::validate_destination_key;
use crate::traits::{BlobStore, BlobWriter, StorageError, StorageResult, WriteAck};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for blobs (e.g., "/var/lib/ferry/blobs")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalBlobStore { base_path })
    }

    /// Convert a destination key to a filesystem path under the base directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_destination_key(key)?;

        let path = self.base_path.join(key);
        if !path.starts_with(&self.base_path) {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        // An existing file may be a symlink pointing elsewhere.
        if let (Ok(canonical), Ok(base_canonical)) =
            (path.canonicalize(), self.base_path.canonicalize())
        {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn open_write(&self, destination_key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        let final_path = self.key_to_path(destination_key)?;
        self.ensure_parent_dir(&final_path).await?;

        // Bytes land in a sibling temp file and are renamed into place on finish.
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = final_path.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4()));
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(LocalBlobWriter {
            key: destination_key.to_string(),
            file: Some(file),
            temp_path,
            final_path,
            bytes_written: 0,
        }))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

struct LocalBlobWriter {
    key: String,
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl LocalBlobWriter {
    fn file(&mut self) -> StorageResult<&mut fs::File> {
        self.file.as_mut().ok_or_else(|| {
            StorageError::WriteFailed(format!("writer for {} is already closed", self.key))
        })
    }
}

#[async_trait]
impl BlobWriter for LocalBlobWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        let len = chunk.len() as u64;
        self.file()?.write_all(&chunk).await?;
        self.bytes_written += len;
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<WriteAck> {
        let mut file = self.file.take().ok_or_else(|| {
            StorageError::WriteFailed(format!("writer for {} is already closed", self.key))
        })?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path).await?;

        tracing::debug!(
            key = %self.key,
            size_bytes = self.bytes_written,
            path = %self.final_path.display(),
            "Local write committed"
        );

        Ok(WriteAck {
            key: self.key.clone(),
            bytes_written: self.bytes_written,
        })
    }

    async fn abort(&mut self) -> StorageResult<()> {
        if self.file.take().is_some() {
            match fs::remove_file(&self.temp_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::IoError(e)),
            }
        }
        Ok(())
    }
}

impl Drop for LocalBlobWriter {
    fn drop(&mut self) {
        // Neither finished nor aborted: leave no partial file behind.
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
