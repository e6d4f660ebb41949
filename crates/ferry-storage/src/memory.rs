//! In-memory blob store with fault injection, for tests.

use crate::traits::{BlobStore, BlobWriter, StorageError, StorageResult, WriteAck};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// `open_write` itself fails.
    Open,
    /// The n-th chunk (1-based) is rejected.
    Chunk(usize),
    /// Every chunk is accepted but the commit is rejected.
    Finish,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Bytes>,
    /// Per-key faults that fire on every write to that key.
    sticky: HashMap<String, WriteFault>,
    /// One-shot faults consumed by the next opened writers.
    queued: VecDeque<WriteFault>,
    chunk_sizes: HashMap<String, Vec<usize>>,
    opened: usize,
    aborted: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every write to `key` at `fault` until cleared.
    pub fn fail_writes_to(&self, key: &str, fault: WriteFault) {
        self.lock().sticky.insert(key.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.sticky.clear();
        state.queued.clear();
    }

    /// Fail the next opened writer (whatever its key) at `fault`.
    pub fn fail_next_write(&self, fault: WriteFault) {
        self.lock().queued.push_back(fault);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Sizes of every chunk received for `key`, across all attempts.
    pub fn chunk_sizes(&self, key: &str) -> Vec<usize> {
        self.lock().chunk_sizes.get(key).cloned().unwrap_or_default()
    }

    pub fn opened_writers(&self) -> usize {
        self.lock().opened
    }

    pub fn aborted_writers(&self) -> usize {
        self.lock().aborted
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn open_write(&self, destination_key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        crate::keys::validate_destination_key(destination_key)?;
        let fault = {
            let mut state = self.lock();
            state.opened += 1;
            match state.sticky.get(destination_key).copied() {
                Some(fault) => Some(fault),
                None => state.queued.pop_front(),
            }
        };
        if fault == Some(WriteFault::Open) {
            return Err(StorageError::WriteFailed(format!(
                "injected open failure for {destination_key}"
            )));
        }
        Ok(Box::new(MemoryBlobWriter {
            store: self.clone(),
            key: destination_key.to_string(),
            buffer: BytesMut::new(),
            chunks: 0,
            fault,
            closed: false,
        }))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

struct MemoryBlobWriter {
    store: MemoryBlobStore,
    key: String,
    buffer: BytesMut,
    chunks: usize,
    fault: Option<WriteFault>,
    closed: bool,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::WriteFailed("writer is closed".to_string()));
        }
        self.chunks += 1;
        self.store
            .lock()
            .chunk_sizes
            .entry(self.key.clone())
            .or_default()
            .push(chunk.len());
        if self.fault == Some(WriteFault::Chunk(self.chunks)) {
            return Err(StorageError::WriteFailed(format!(
                "injected failure on chunk {} of {}",
                self.chunks, self.key
            )));
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<WriteAck> {
        if self.closed {
            return Err(StorageError::WriteFailed("writer is closed".to_string()));
        }
        if self.fault == Some(WriteFault::Finish) {
            return Err(StorageError::WriteFailed(format!(
                "injected commit failure for {}",
                self.key
            )));
        }
        self.closed = true;
        let body = self.buffer.split().freeze();
        let bytes_written = body.len() as u64;
        self.store.lock().objects.insert(self.key.clone(), body);
        Ok(WriteAck {
            key: self.key.clone(),
            bytes_written,
        })
    }

    async fn abort(&mut self) -> StorageResult<()> {
        if !self.closed {
            self.closed = true;
            self.buffer.clear();
            self.store.lock().aborted += 1;
        }
        Ok(())
    }
}
