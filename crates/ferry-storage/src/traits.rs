//! Blob store abstraction traits
//!
//! This module defines the traits every storage backend implements.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::ErrorClass;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// A chunk or the final commit was rejected. Safe to retry the whole object.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ErrorClass for StorageError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::WriteFailed(_) | StorageError::BackendError(_) | StorageError::IoError(_)
        )
    }

    fn error_code(&self) -> &'static str {
        match self {
            StorageError::WriteFailed(_) => "STORAGE_WRITE_FAILED",
            StorageError::InvalidKey(_) => "STORAGE_INVALID_KEY",
            StorageError::BackendError(_) => "STORAGE_BACKEND_ERROR",
            StorageError::IoError(_) => "STORAGE_IO_ERROR",
            StorageError::ConfigError(_) => "STORAGE_CONFIG_ERROR",
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Acknowledgement that an object is durably stored under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub key: String,
    pub bytes_written: u64,
}

/// Sequential chunk sink for a single object.
///
/// Nothing is visible under the destination key until `finish` succeeds.
/// After `finish` or `abort` the writer must not be used again.
#[async_trait]
pub trait BlobWriter: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Commit the object. Only a returned `WriteAck` signals durability.
    async fn finish(&mut self) -> StorageResult<WriteAck>;

    /// Discard everything written so far.
    async fn abort(&mut self) -> StorageResult<()>;
}

/// Blob store abstraction
///
/// All backends (S3, local filesystem) implement this trait so the transfer
/// stage can stream into any of them. Writing the same key twice overwrites
/// the previous object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a streamed write for `destination_key`.
    async fn open_write(&self, destination_key: &str) -> StorageResult<Box<dyn BlobWriter>>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
