//! Ledger access contract consumed by the pipeline stages.

use async_trait::async_trait;
use ferry_core::{FileRecord, LedgerStats, NewFileRecord};
use std::time::Duration;
use uuid::Uuid;

use crate::error::LedgerResult;

/// Metadata ledger: one row per admitted remote file.
///
/// Implementations must enforce uniqueness on `identity_key` and must never
/// reset `transferred` once it is true.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a record unless one with the same identity key exists.
    /// Returns `true` when a row was created, `false` for the no-op case.
    async fn insert_if_absent(&self, record: &NewFileRecord) -> LedgerResult<bool>;

    /// Eligible records (`transferred = false`, destination set), oldest first,
    /// ties broken by id. Does not claim.
    async fn select_batch(&self, limit: i64) -> LedgerResult<Vec<FileRecord>>;

    /// Atomically claim up to `limit` eligible records for `worker_id`.
    ///
    /// Records with a live claim held by another worker are skipped; claims
    /// older than `claim_ttl` count as abandoned. Ids in `exclude` are never
    /// returned. The result is ordered oldest first.
    async fn claim_batch(
        &self,
        worker_id: Uuid,
        limit: i64,
        exclude: &[i64],
        claim_ttl: Duration,
    ) -> LedgerResult<Vec<FileRecord>>;

    /// Flip `transferred` to true and clear the claim, provided the record
    /// still points at `destination_key`. Returns `false` when the record was
    /// already transferred or its destination changed since it was claimed.
    async fn mark_transferred(
        &self,
        id: i64,
        worker_id: Uuid,
        destination_key: &str,
    ) -> LedgerResult<bool>;

    /// Drop the claim held by `worker_id` without touching `transferred`.
    async fn release_claim(&self, id: i64, worker_id: Uuid) -> LedgerResult<()>;

    /// Store the destination computed by the external naming step.
    ///
    /// Changing the destination of a transferred record, or of one a worker
    /// holds a claim younger than `claim_ttl` on, is refused. Re-sending the
    /// current destination always succeeds.
    async fn set_destination_key(
        &self,
        identity_key: &str,
        destination_key: &str,
        claim_ttl: Duration,
    ) -> LedgerResult<FileRecord>;

    async fn get_by_identity(&self, identity_key: &str) -> LedgerResult<Option<FileRecord>>;

    async fn stats(&self, claim_ttl: Duration) -> LedgerResult<LedgerStats>;

    /// Cheap round trip used by the driver to probe connectivity.
    async fn ping(&self) -> LedgerResult<()>;
}
