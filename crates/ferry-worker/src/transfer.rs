//! Transfer stage.
//!
//! Claims eligible ledger records and streams each file from the remote
//! directory into the blob store in fixed-size chunks. A record is marked
//! transferred only after the store acknowledges the complete object; any
//! failure aborts the write, releases the claim and leaves the record eligible.

use bytes::{Bytes, BytesMut};
use ferry_core::{FileRecord, PipelineConfig, TransferReport};
use ferry_db::Ledger;
use ferry_drive::{RemoteDirectory, RemoteResult};
use ferry_storage::{BlobStore, BlobWriter};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{log_error, MigrationError};

/// Re-cuts a remote byte stream into chunks of exactly `chunk_size` bytes
/// (the last one may be shorter). At most one chunk plus one incoming piece is
/// buffered at any time.
pub struct Rechunker {
    inner: BoxStream<'static, RemoteResult<Bytes>>,
    chunk_size: usize,
    buffer: BytesMut,
    done: bool,
}

impl Rechunker {
    pub fn new(inner: BoxStream<'static, RemoteResult<Bytes>>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            inner,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            done: false,
        }
    }

    /// `None` once the stream is exhausted or has failed.
    pub async fn next_chunk(&mut self) -> Option<RemoteResult<Bytes>> {
        loop {
            if self.buffer.len() >= self.chunk_size {
                return Some(Ok(self.buffer.split_to(self.chunk_size).freeze()));
            }
            if self.done {
                if self.buffer.is_empty() {
                    return None;
                }
                return Some(Ok(self.buffer.split().freeze()));
            }
            match self.inner.next().await {
                Some(Ok(piece)) => self.buffer.extend_from_slice(&piece),
                Some(Err(e)) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
                None => self.done = true,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub max_attempts_per_run: u32,
    pub claim_ttl: Duration,
    pub verify_size: bool,
}

impl TransferSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes,
            max_attempts_per_run: config.max_attempts_per_run,
            claim_ttl: config.claim_ttl,
            verify_size: config.verify_size,
        }
    }
}

#[derive(Default)]
struct RunInner {
    attempts: HashMap<i64, u32>,
    exhausted: Vec<i64>,
    /// Claims (record id, holder) that could not be released while the
    /// ledger was unreachable.
    stranded: Vec<(i64, Uuid)>,
}

/// Failure bookkeeping for one invocation of the transfer loop, shared by all
/// workers of that invocation. Records that fail `max_attempts_per_run` times
/// are excluded from selection until the next invocation.
#[derive(Default)]
pub struct TransferRunState {
    inner: Mutex<RunInner>,
}

impl TransferRunState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn excluded(&self) -> Vec<i64> {
        self.lock().exhausted.clone()
    }

    /// Forget attempt counts and exclusions. Stranded claims are kept.
    pub fn reset_attempts(&self) {
        let mut inner = self.lock();
        inner.attempts.clear();
        inner.exhausted.clear();
    }

    /// Claims still waiting to be released.
    pub fn stranded(&self) -> usize {
        self.lock().stranded.len()
    }

    fn strand(&self, claims: impl IntoIterator<Item = (i64, Uuid)>) {
        self.lock().stranded.extend(claims);
    }

    fn take_stranded(&self) -> Vec<(i64, Uuid)> {
        std::mem::take(&mut self.lock().stranded)
    }

    /// Count a failure; returns `true` if the record just ran out of attempts.
    fn record_failure(&self, id: i64, max_attempts: u32) -> bool {
        let mut inner = self.lock();
        let attempts = inner.attempts.entry(id).or_insert(0);
        *attempts += 1;
        if *attempts == max_attempts.max(1) {
            inner.exhausted.push(id);
            return true;
        }
        false
    }
}

#[derive(Clone)]
pub struct TransferStage {
    directory: Arc<dyn RemoteDirectory>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn BlobStore>,
    settings: TransferSettings,
    worker_id: Uuid,
}

impl TransferStage {
    pub fn new(
        directory: Arc<dyn RemoteDirectory>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn BlobStore>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            directory,
            ledger,
            store,
            settings,
            worker_id: Uuid::new_v4(),
        }
    }

    /// Same collaborators, fresh worker identity.
    pub fn for_new_worker(&self) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    async fn abort_quietly(writer: &mut Box<dyn BlobWriter>, identity_key: &str) {
        if let Err(e) = writer.abort().await {
            tracing::warn!(error = %e, identity_key = %identity_key, "Failed to abort blob write");
        }
    }

    /// Release claims on records this worker will not process. Claims that
    /// cannot be released are kept in `state` for the next batch.
    async fn abandon(&self, ids: &[i64], state: &TransferRunState) {
        for (position, &id) in ids.iter().enumerate() {
            if let Err(e) = self.ledger.release_claim(id, self.worker_id).await {
                log_error(&MigrationError::from(e), "Failed to release claim");
                state.strand(ids[position..].iter().map(|&id| (id, self.worker_id)));
                tracing::warn!(
                    stranded = ids.len() - position,
                    "Claims kept until the ledger is reachable"
                );
                return;
            }
        }
    }

    /// Release claims left behind by an earlier ledger outage.
    async fn release_stranded(&self, state: &TransferRunState) -> Result<(), MigrationError> {
        let stranded = state.take_stranded();
        for (position, &(id, holder)) in stranded.iter().enumerate() {
            if let Err(e) = self.ledger.release_claim(id, holder).await {
                state.strand(stranded[position..].iter().copied());
                return Err(e.into());
            }
        }
        if !stranded.is_empty() {
            tracing::info!(released = stranded.len(), "Released claims stranded by a ledger outage");
        }
        Ok(())
    }

    /// Stream one record into the blob store and mark it transferred.
    /// Returns the number of bytes written.
    #[tracing::instrument(
        skip(self, record),
        fields(identity_key = %record.identity_key, record_id = record.id, worker_id = %self.worker_id)
    )]
    pub async fn transfer_one(&self, record: &FileRecord) -> Result<u64, MigrationError> {
        let destination = record
            .destination()
            .ok_or_else(|| MigrationError::MissingDestination {
                identity_key: record.identity_key.clone(),
            })?
            .to_string();

        let stream = self.directory.open_stream(&record.identity_key).await?;
        let total = stream
            .content_length
            .or_else(|| record.size_bytes.and_then(|s| u64::try_from(s).ok()));
        let mut chunks = Rechunker::new(stream.body, self.settings.chunk_size);
        let mut writer = self.store.open_write(&destination).await?;

        let mut written = 0u64;
        let mut index = 0usize;
        while let Some(chunk) = chunks.next_chunk().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    Self::abort_quietly(&mut writer, &record.identity_key).await;
                    return Err(e.into());
                }
            };
            let len = chunk.len() as u64;
            if let Err(e) = writer.write_chunk(chunk).await {
                Self::abort_quietly(&mut writer, &record.identity_key).await;
                return Err(e.into());
            }
            written += len;
            index += 1;

            match total {
                Some(total) if total > 0 => tracing::debug!(
                    chunk = index,
                    bytes = written,
                    total_bytes = total,
                    percent = written.saturating_mul(100) / total,
                    "Transfer progress"
                ),
                _ => tracing::debug!(chunk = index, bytes = written, "Transfer progress"),
            }
        }

        let ack = match writer.finish().await {
            Ok(ack) => ack,
            Err(e) => {
                Self::abort_quietly(&mut writer, &record.identity_key).await;
                return Err(e.into());
            }
        };

        if self.settings.verify_size {
            if let Some(expected) = record.size_bytes.and_then(|s| u64::try_from(s).ok()) {
                if expected != ack.bytes_written {
                    return Err(MigrationError::SizeMismatch {
                        identity_key: record.identity_key.clone(),
                        expected,
                        actual: ack.bytes_written,
                    });
                }
            }
        }

        if !self
            .ledger
            .mark_transferred(record.id, self.worker_id, &destination)
            .await?
        {
            match self.ledger.get_by_identity(&record.identity_key).await? {
                Some(current) if current.transferred => {
                    tracing::debug!("Record was already marked transferred");
                }
                _ => {
                    return Err(MigrationError::DestinationChanged {
                        identity_key: record.identity_key.clone(),
                        written: destination,
                    });
                }
            }
        }
        Ok(ack.bytes_written)
    }

    /// Claim one batch and process it in order. An empty report means there
    /// was nothing eligible.
    pub async fn run_batch(
        &self,
        batch_size: i64,
        state: &TransferRunState,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, MigrationError> {
        self.release_stranded(state).await?;
        let excluded = state.excluded();
        let batch = self
            .ledger
            .claim_batch(self.worker_id, batch_size, &excluded, self.settings.claim_ttl)
            .await?;

        let mut report = TransferReport {
            batches: usize::from(!batch.is_empty()),
            selected: batch.len(),
            ..Default::default()
        };

        for (position, record) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                let pending: Vec<i64> = batch[position..].iter().map(|r| r.id).collect();
                self.abandon(&pending, state).await;
                tracing::info!(released = pending.len(), "Transfer cancelled between records");
                break;
            }

            match self.transfer_one(record).await {
                Ok(bytes) => {
                    report.transferred += 1;
                    report.bytes += bytes;
                    tracing::info!(
                        identity_key = %record.identity_key,
                        destination_key = record.destination().unwrap_or_default(),
                        size_bytes = bytes,
                        "Transferred file"
                    );
                }
                Err(e) if e.is_connectivity() => {
                    let unfinished: Vec<i64> = batch[position..].iter().map(|r| r.id).collect();
                    self.abandon(&unfinished, state).await;
                    return Err(e);
                }
                Err(e) => {
                    report.failed += 1;
                    log_error(&e, "Transfer failed, record stays eligible");
                    self.abandon(&[record.id], state).await;
                    if state.record_failure(record.id, self.settings.max_attempts_per_run) {
                        report.exhausted += 1;
                        tracing::warn!(
                            identity_key = %record.identity_key,
                            attempts = self.settings.max_attempts_per_run,
                            "Giving up on record for this run"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Process batches until selection comes back empty or `cancel` fires.
    pub async fn run_transfer_loop(
        &self,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, MigrationError> {
        let state = TransferRunState::new();
        self.run_transfer_loop_with(batch_size, &state, cancel).await
    }

    /// [`run_transfer_loop`](Self::run_transfer_loop) with caller-owned failure
    /// bookkeeping, so several workers or passes can share it.
    pub async fn run_transfer_loop_with(
        &self,
        batch_size: i64,
        state: &TransferRunState,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, MigrationError> {
        let mut total = TransferReport::default();
        while !cancel.is_cancelled() {
            let report = self.run_batch(batch_size, state, cancel).await?;
            total.merge(&report);
            if report.is_empty() {
                break;
            }
        }

        tracing::info!(
            worker_id = %self.worker_id,
            batches = total.batches,
            selected = total.selected,
            transferred = total.transferred,
            failed = total.failed,
            exhausted = total.exhausted,
            bytes = total.bytes,
            "Transfer loop complete"
        );
        Ok(total)
    }
}
