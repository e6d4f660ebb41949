//! In-memory ledger for tests.
//!
//! Mirrors the PostgreSQL semantics: unique identity keys, oldest-first
//! selection, claims with TTL and monotonic `transferred`.

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::{FileRecord, LedgerStats, NewFileRecord};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;

#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<Vec<FileRecord>>>,
    offline: Arc<AtomicBool>,
    mark_calls: Arc<AtomicUsize>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FileRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> LedgerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Connectivity(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    /// Simulate losing (or regaining) the database connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of every record, in insertion order.
    pub fn records(&self) -> Vec<FileRecord> {
        self.lock().clone()
    }

    pub fn record(&self, identity_key: &str) -> Option<FileRecord> {
        self.lock()
            .iter()
            .find(|r| r.identity_key == identity_key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of successful `mark_transferred` flips.
    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }

    /// Plant a claim as if another worker held it since `claimed_at`.
    pub fn plant_claim(&self, identity_key: &str, worker_id: Uuid, age: Duration) {
        let mut records = self.lock();
        if let Some(record) = records.iter_mut().find(|r| r.identity_key == identity_key) {
            let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
            record.claimed_by = Some(worker_id);
            record.claimed_at = Some(Utc::now() - age);
        }
    }
}

fn claim_is_live(record: &FileRecord, worker_id: Option<Uuid>, claim_ttl: Duration) -> bool {
    match (record.claimed_by, record.claimed_at) {
        (Some(holder), Some(at)) => {
            if Some(holder) == worker_id {
                return false;
            }
            let ttl = chrono::Duration::from_std(claim_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
            Utc::now() - at < ttl
        }
        _ => false,
    }
}

fn oldest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_if_absent(&self, record: &NewFileRecord) -> LedgerResult<bool> {
        self.check_online()?;
        let mut records = self.lock();
        if records.iter().any(|r| r.identity_key == record.identity_key) {
            return Ok(false);
        }
        let now = Utc::now();
        let id = records.len() as i64 + 1;
        records.push(FileRecord {
            id,
            identity_key: record.identity_key.clone(),
            origin_name: record.origin_name.clone(),
            origin_path: record.origin_path.clone(),
            internal_id: record.internal_id,
            category: record.category,
            extension: record.extension.clone(),
            size_bytes: record.size_bytes,
            transferred: false,
            finalized: false,
            destination_key: None,
            new_name: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }

    async fn select_batch(&self, limit: i64) -> LedgerResult<Vec<FileRecord>> {
        self.check_online()?;
        let mut eligible: Vec<FileRecord> =
            self.lock().iter().filter(|r| r.is_eligible()).cloned().collect();
        oldest_first(&mut eligible);
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }

    async fn claim_batch(
        &self,
        worker_id: Uuid,
        limit: i64,
        exclude: &[i64],
        claim_ttl: Duration,
    ) -> LedgerResult<Vec<FileRecord>> {
        self.check_online()?;
        let mut records = self.lock();
        let mut candidates: Vec<&mut FileRecord> = records
            .iter_mut()
            .filter(|r| {
                r.is_eligible()
                    && !exclude.contains(&r.id)
                    && !claim_is_live(r, Some(worker_id), claim_ttl)
            })
            .collect();
        candidates.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let now = Utc::now();
        let claimed = candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| {
                r.claimed_by = Some(worker_id);
                r.claimed_at = Some(now);
                r.updated_at = now;
                r.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_transferred(
        &self,
        id: i64,
        _worker_id: Uuid,
        destination_key: &str,
    ) -> LedgerResult<bool> {
        self.check_online()?;
        let mut records = self.lock();
        match records.iter_mut().find(|r| {
            r.id == id && !r.transferred && r.destination_key.as_deref() == Some(destination_key)
        }) {
            Some(record) => {
                record.transferred = true;
                record.claimed_by = None;
                record.claimed_at = None;
                record.updated_at = Utc::now();
                self.mark_calls.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_claim(&self, id: i64, worker_id: Uuid) -> LedgerResult<()> {
        self.check_online()?;
        let mut records = self.lock();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.claimed_by == Some(worker_id))
        {
            record.claimed_by = None;
            record.claimed_at = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_destination_key(
        &self,
        identity_key: &str,
        destination_key: &str,
        claim_ttl: Duration,
    ) -> LedgerResult<FileRecord> {
        self.check_online()?;
        let destination_key = destination_key.trim();
        if destination_key.is_empty() {
            return Err(LedgerError::InvalidInput(
                "destination key cannot be empty".to_string(),
            ));
        }
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| r.identity_key == identity_key)
            .ok_or_else(|| LedgerError::NotFound(identity_key.to_string()))?;
        if record.destination_key.as_deref() != Some(destination_key) {
            if record.transferred {
                return Err(LedgerError::AlreadyTransferred(identity_key.to_string()));
            }
            if claim_is_live(record, None, claim_ttl) {
                return Err(LedgerError::Claimed(identity_key.to_string()));
            }
        }
        record.destination_key = Some(destination_key.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get_by_identity(&self, identity_key: &str) -> LedgerResult<Option<FileRecord>> {
        self.check_online()?;
        Ok(self.record(identity_key))
    }

    async fn stats(&self, claim_ttl: Duration) -> LedgerResult<LedgerStats> {
        self.check_online()?;
        let records = self.lock();
        let count = |f: &dyn Fn(&FileRecord) -> bool| records.iter().filter(|r| f(r)).count() as i64;
        Ok(LedgerStats {
            total: records.len() as i64,
            awaiting_destination: count(&|r| !r.transferred && r.destination().is_none()),
            eligible: count(&|r| r.is_eligible()),
            claimed: count(&|r| !r.transferred && claim_is_live(r, None, claim_ttl)),
            transferred: count(&|r| r.transferred),
            finalized: count(&|r| r.finalized),
        })
    }

    async fn ping(&self) -> LedgerResult<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::FileCategory;

    fn new_record(identity_key: &str) -> NewFileRecord {
        NewFileRecord {
            identity_key: identity_key.to_string(),
            origin_name: format!("{identity_key}.jpg"),
            origin_path: format!("watched/{identity_key}.jpg"),
            internal_id: Uuid::new_v4(),
            category: FileCategory::Image,
            extension: Some("jpg".to_string()),
            size_bytes: Some(10),
        }
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn insert_is_idempotent_on_identity() {
        let ledger = MemoryLedger::new();
        assert!(ledger.insert_if_absent(&new_record("a")).await.unwrap());
        for _ in 0..5 {
            assert!(!ledger.insert_if_absent(&new_record("a")).await.unwrap());
        }
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn selection_requires_destination() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(&new_record("a")).await.unwrap();
        ledger.insert_if_absent(&new_record("b")).await.unwrap();
        assert!(ledger.select_batch(10).await.unwrap().is_empty());

        ledger.set_destination_key("b", "media/b.jpg", TTL).await.unwrap();
        let batch = ledger.select_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].identity_key, "b");
    }

    #[tokio::test]
    async fn live_claims_are_skipped_and_stale_ones_reclaimed() {
        let ledger = MemoryLedger::new();
        for key in ["a", "b"] {
            ledger.insert_if_absent(&new_record(key)).await.unwrap();
            ledger.set_destination_key(key, &format!("media/{key}"), TTL).await.unwrap();
        }
        let other = Uuid::new_v4();
        ledger.plant_claim("a", other, Duration::from_secs(10));
        ledger.plant_claim("b", other, Duration::from_secs(7200));

        let me = Uuid::new_v4();
        let claimed = ledger.claim_batch(me, 10, &[], TTL).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].identity_key, "b");
        assert_eq!(claimed[0].claimed_by, Some(me));
    }

    #[tokio::test]
    async fn transferred_never_resets() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(&new_record("a")).await.unwrap();
        ledger.set_destination_key("a", "media/a.jpg", TTL).await.unwrap();
        let worker = Uuid::new_v4();
        assert!(ledger.mark_transferred(1, worker, "media/a.jpg").await.unwrap());
        assert!(!ledger.mark_transferred(1, worker, "media/a.jpg").await.unwrap());
        assert!(ledger.record("a").unwrap().transferred);

        let err = ledger.set_destination_key("a", "media/other.jpg", TTL).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyTransferred(_)));
        assert!(ledger.set_destination_key("a", "media/a.jpg", TTL).await.is_ok());
    }

    #[tokio::test]
    async fn destination_is_locked_while_claimed() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(&new_record("a")).await.unwrap();
        ledger.set_destination_key("a", "media/a.jpg", TTL).await.unwrap();
        let worker = Uuid::new_v4();
        let claimed = ledger.claim_batch(worker, 1, &[], TTL).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let err = ledger
            .set_destination_key("a", "media/renamed.jpg", TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Claimed(_)));
        assert!(ledger.set_destination_key("a", "media/a.jpg", TTL).await.is_ok());

        ledger.release_claim(1, worker).await.unwrap();
        let record = ledger
            .set_destination_key("a", "media/renamed.jpg", TTL)
            .await
            .unwrap();
        assert_eq!(record.destination_key.as_deref(), Some("media/renamed.jpg"));
    }

    #[tokio::test]
    async fn mark_requires_the_destination_that_was_written() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(&new_record("a")).await.unwrap();
        ledger.set_destination_key("a", "media/a.jpg", TTL).await.unwrap();
        let worker = Uuid::new_v4();

        assert!(!ledger.mark_transferred(1, worker, "media/old.jpg").await.unwrap());
        assert!(!ledger.record("a").unwrap().transferred);
        assert_eq!(ledger.mark_calls(), 0);
        assert!(ledger.mark_transferred(1, worker, "media/a.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn offline_ledger_reports_connectivity() {
        let ledger = MemoryLedger::new();
        ledger.set_offline(true);
        let err = ledger.ping().await.unwrap_err();
        assert!(err.is_connectivity());
        ledger.set_offline(false);
        assert!(ledger.ping().await.is_ok());
    }
}
