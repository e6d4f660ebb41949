//! Ferry Storage Library
//!
//! Blob store abstraction and backends (S3 via `object_store`, local
//! filesystem). Writes are streamed: callers open a [`BlobWriter`] for a
//! destination key, push bounded chunks into it and only treat the object as
//! durable once [`BlobWriter::finish`] returns a [`WriteAck`].
//!
//! # Destination keys
//!
//! Keys are computed by an external naming step and treated as opaque. They
//! must not be empty, start with `/`, or contain `..` segments; see
//! [`keys::validate_destination_key`].

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_store;
pub use ferry_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{MemoryBlobStore, WriteFault};
#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;
pub use traits::{BlobStore, BlobWriter, StorageError, StorageResult, WriteAck};
