//! Remote directory contract consumed by the pipeline stages.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{Area, RemoteEntry};
use futures::stream::BoxStream;

use crate::error::RemoteResult;

/// Outcome of a relocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Moved,
    /// The entry already sat in the destination area.
    AlreadyInPlace,
    /// The entry no longer exists remotely.
    Missing,
}

/// Streamed read of one remote entry.
pub struct RemoteStream {
    /// Length announced by the remote, when known.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, RemoteResult<Bytes>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Every live entry directly under `location`, in a stable order.
    async fn list(&self, location: &str) -> RemoteResult<Vec<RemoteEntry>>;

    /// Move an entry into `area`. Moving an entry that is already there, or
    /// that no longer exists, is not an error.
    async fn relocate(&self, identity_key: &str, area: Area) -> RemoteResult<Relocation>;

    async fn open_stream(&self, identity_key: &str) -> RemoteResult<RemoteStream>;
}
