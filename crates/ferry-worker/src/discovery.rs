//! Discovery & classification stage.
//!
//! One pass lists the watched location and decides the fate of every entry:
//! non-canonical duplicates go to the duplicates area, canonical documents go
//! to the documents area, everything else is registered in the ledger and
//! moved to the download area. Registration happens before relocation so a
//! crash in between leaves a ledger row and an entry that the next pass
//! registers again as a no-op.

use ferry_core::{
    Area, Classifier, DedupKey, DiscoveryReport, FileCategory, NewFileRecord, RemoteEntry,
};
use ferry_db::Ledger;
use ferry_drive::{Relocation, RemoteDirectory};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_error, MigrationError};

/// Entries of one listing split by what discovery will do with them.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoveryPlan {
    /// First entry of each (name, size, type) group, in listing order.
    pub canonical: Vec<RemoteEntry>,
    /// Every later entry of a group, in listing order.
    pub duplicates: Vec<RemoteEntry>,
    /// Entries whose metadata is unusable.
    pub skipped: Vec<RemoteEntry>,
}

/// Group a listing by dedup key. The first entry of each group, in listing
/// order, is canonical.
pub fn plan_entries(entries: Vec<RemoteEntry>) -> DiscoveryPlan {
    let mut plan = DiscoveryPlan::default();
    let mut seen: HashSet<DedupKey> = HashSet::new();

    for entry in entries {
        if entry.identity_key.trim().is_empty() || entry.name.trim().is_empty() {
            plan.skipped.push(entry);
            continue;
        }
        if seen.insert(entry.dedup_key()) {
            plan.canonical.push(entry);
        } else {
            plan.duplicates.push(entry);
        }
    }

    plan
}

#[derive(Clone)]
pub struct DiscoveryStage {
    directory: Arc<dyn RemoteDirectory>,
    ledger: Arc<dyn Ledger>,
    classifier: Classifier,
}

impl DiscoveryStage {
    pub fn new(
        directory: Arc<dyn RemoteDirectory>,
        ledger: Arc<dyn Ledger>,
        classifier: Classifier,
    ) -> Self {
        Self {
            directory,
            ledger,
            classifier,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Relocate one entry, counting the outcome. Relocation failures never
    /// abort the pass; the entry stays in the watched location. Returns
    /// `false` when the relocation call failed.
    async fn route(&self, entry: &RemoteEntry, area: Area, report: &mut DiscoveryReport) -> bool {
        match self.directory.relocate(&entry.identity_key, area).await {
            Ok(Relocation::Moved) => {
                report.relocated += 1;
                true
            }
            Ok(outcome) => {
                tracing::debug!(
                    identity_key = %entry.identity_key,
                    area = %area,
                    outcome = ?outcome,
                    "Relocation was a no-op"
                );
                true
            }
            Err(e) => {
                report.relocation_failures += 1;
                log_error(&MigrationError::from(e), "Failed to relocate entry");
                tracing::warn!(identity_key = %entry.identity_key, area = %area, "Entry left in place");
                false
            }
        }
    }

    /// One pass over `watch_location`.
    ///
    /// Listing and ledger failures abort the pass; relocation failures and
    /// unusable entries are counted and skipped. A group whose duplicate could
    /// not be relocated keeps its canonical entry untouched until a later pass
    /// sees the group again, so only one member of a group is ever registered.
    #[tracing::instrument(skip(self))]
    pub async fn discover_and_register(
        &self,
        watch_location: &str,
    ) -> Result<DiscoveryReport, MigrationError> {
        let entries = self.directory.list(watch_location).await?;
        let mut report = DiscoveryReport {
            listed: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let plan = plan_entries(entries);

        for entry in &plan.skipped {
            report.skipped += 1;
            tracing::warn!(
                identity_key = %entry.identity_key,
                name = %entry.name,
                mime_type = %entry.mime_type,
                "Skipping entry with unreadable metadata"
            );
        }

        let mut unsettled: HashSet<DedupKey> = HashSet::new();
        for entry in &plan.duplicates {
            report.duplicates += 1;
            tracing::debug!(identity_key = %entry.identity_key, name = %entry.name, "Duplicate entry");
            if !self.route(entry, Area::Duplicates, &mut report).await {
                unsettled.insert(entry.dedup_key());
            }
        }

        for entry in &plan.canonical {
            if unsettled.contains(&entry.dedup_key()) {
                report.deferred += 1;
                tracing::info!(
                    identity_key = %entry.identity_key,
                    name = %entry.name,
                    "Deferring entry until its duplicates are relocated"
                );
                continue;
            }

            let category = self.classifier.classify(entry);
            if category == FileCategory::Document {
                report.documents += 1;
                self.route(entry, Area::Documents, &mut report).await;
                continue;
            }

            let record = NewFileRecord::from_entry(entry, category, watch_location);
            if self.ledger.insert_if_absent(&record).await? {
                report.registered += 1;
                tracing::debug!(
                    identity_key = %record.identity_key,
                    internal_id = %record.internal_id,
                    category = %category,
                    "Registered entry"
                );
            } else {
                report.already_registered += 1;
            }
            self.route(entry, Area::Download, &mut report).await;
        }

        tracing::info!(
            listed = report.listed,
            duplicates = report.duplicates,
            documents = report.documents,
            registered = report.registered,
            already_registered = report.already_registered,
            queued = report.queued(),
            skipped = report.skipped,
            relocation_failures = report.relocation_failures,
            deferred = report.deferred,
            relocated = report.relocated,
            "Discovery pass complete"
        );

        Ok(report)
    }

    /// Run passes until the listing comes back empty, a pass moves nothing
    /// out of the watched location, or `cancel` fires between passes.
    pub async fn run_until_empty(
        &self,
        watch_location: &str,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, MigrationError> {
        let mut total = DiscoveryReport::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let pass = self.discover_and_register(watch_location).await?;
            total.merge(&pass);
            if pass.is_empty() {
                break;
            }
            if !pass.made_progress() {
                tracing::warn!(
                    listed = pass.listed,
                    skipped = pass.skipped,
                    relocation_failures = pass.relocation_failures,
                    "Discovery made no progress, stopping until the next run"
                );
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_db::MemoryLedger;
    use ferry_drive::MemoryDirectory;

    const WATCHED: &str = "watched";

    fn stage(directory: &MemoryDirectory, ledger: &MemoryLedger) -> DiscoveryStage {
        DiscoveryStage::new(
            Arc::new(directory.clone()),
            Arc::new(ledger.clone()),
            Classifier::default(),
        )
    }

    fn ids(entries: &[RemoteEntry]) -> Vec<String> {
        entries.iter().map(|e| e.identity_key.clone()).collect()
    }

    #[test]
    fn plan_keeps_first_of_each_group() {
        let entries = vec![
            RemoteEntry::new("1", "A", Some(100), "image/jpeg"),
            RemoteEntry::new("2", "A", Some(100), "image/jpeg"),
            RemoteEntry::new("3", "A", Some(101), "image/jpeg"),
            RemoteEntry::new("4", "A", Some(100), "image/jpeg"),
            RemoteEntry::new("", "broken", None, ""),
        ];
        let plan = plan_entries(entries);
        assert_eq!(ids(&plan.canonical), vec!["1", "3"]);
        assert_eq!(ids(&plan.duplicates), vec!["2", "4"]);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn plan_keeps_exactly_one_per_group_for_any_group_size() {
        for k in 1..=8 {
            let entries = (0..k)
                .map(|i| RemoteEntry::new(format!("id-{i}"), "clip.mp4", Some(42), "video/mp4"))
                .collect();
            let plan = plan_entries(entries);
            assert_eq!(plan.canonical.len(), 1);
            assert_eq!(plan.duplicates.len(), k - 1);
            assert_eq!(plan.canonical[0].identity_key, "id-0");
        }
    }

    #[test]
    fn missing_size_groups_with_zero() {
        let plan = plan_entries(vec![
            RemoteEntry::new("1", "Doc", None, "application/vnd.google-apps.document"),
            RemoteEntry::new("2", "Doc", Some(0), "application/vnd.google-apps.document"),
        ]);
        assert_eq!(plan.canonical.len(), 1);
        assert_eq!(plan.duplicates.len(), 1);
    }

    #[tokio::test]
    async fn routes_duplicates_documents_and_media() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("a1", "A", Some(100), "image/png"));
        directory.add_entry(WATCHED, RemoteEntry::new("a2", "A", Some(100), "image/png"));
        directory.add_entry(
            WATCHED,
            RemoteEntry::new("b", "B", Some(50), "application/vnd.google-apps.document"),
        );

        let report = stage(&directory, &ledger)
            .discover_and_register(WATCHED)
            .await
            .unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.documents, 1);
        assert_eq!(report.registered, 1);
        assert_eq!(directory.relocations_to(Area::Duplicates), 1);
        assert_eq!(directory.relocations_to(Area::Documents), 1);
        assert_eq!(directory.relocations_to(Area::Download), 1);
        assert!(directory.entries(WATCHED).is_empty());

        assert_eq!(ledger.len(), 1);
        let record = ledger.record("a1").unwrap();
        assert_eq!(record.category, FileCategory::Image);
        assert_eq!(record.origin_path, "watched/A");
        assert!(!record.transferred);
        assert!(record.destination_key.is_none());
    }

    #[tokio::test]
    async fn repeated_passes_register_once() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("a1", "A.mov", Some(10), "video/quicktime"));
        // Relocation keeps failing, so every pass sees the same listing.
        directory.fail_relocation("a1");

        let stage = stage(&directory, &ledger);
        for _ in 0..5 {
            let report = stage.discover_and_register(WATCHED).await.unwrap();
            assert_eq!(report.relocation_failures, 1);
        }
        assert_eq!(ledger.len(), 1);
        assert_eq!(directory.entries(WATCHED).len(), 1);

        directory.heal_relocation("a1");
        let report = stage.discover_and_register(WATCHED).await.unwrap();
        assert_eq!(report.already_registered, 1);
        assert_eq!(report.relocated, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn group_with_stranded_duplicate_is_registered_once() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("a1", "A.jpg", Some(100), "image/jpeg"));
        directory.add_entry(WATCHED, RemoteEntry::new("a2", "A.jpg", Some(100), "image/jpeg"));
        directory.fail_relocation("a2");

        let stage = stage(&directory, &ledger);
        let report = stage.discover_and_register(WATCHED).await.unwrap();
        assert_eq!(report.relocation_failures, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.registered, 0);
        assert!(ledger.is_empty());
        assert_eq!(directory.entries(WATCHED).len(), 2);

        directory.heal_relocation("a2");
        let report = stage.discover_and_register(WATCHED).await.unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.registered, 1);
        assert_eq!(report.deferred, 0);

        assert_eq!(ledger.len(), 1);
        assert!(ledger.record("a1").is_some());
        assert!(ledger.record("a2").is_none());
        assert_eq!(directory.entries("duplicates").len(), 1);
        assert_eq!(directory.entries("duplicates")[0].identity_key, "a2");
        assert!(directory.entries(WATCHED).is_empty());
    }

    #[tokio::test]
    async fn entry_reported_in_place_but_still_listed_is_not_progress() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("s", "s.jpg", Some(1), "image/jpeg"));
        directory.stick_relocation("s");
        let cancel = CancellationToken::new();

        let report = stage(&directory, &ledger)
            .run_until_empty(WATCHED, &cancel)
            .await
            .unwrap();
        assert_eq!(report.listed, 1);
        assert_eq!(report.relocated, 0);
        assert!(!report.made_progress());
        assert_eq!(ledger.len(), 1);
        assert_eq!(directory.entries(WATCHED).len(), 1);
    }

    #[tokio::test]
    async fn unreadable_entries_are_skipped_not_fatal() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("", "", None, ""));
        directory.add_entry(WATCHED, RemoteEntry::new("ok", "ok.jpg", Some(1), "image/jpeg"));

        let report = stage(&directory, &ledger)
            .discover_and_register(WATCHED)
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.registered, 1);
    }

    #[tokio::test]
    async fn ledger_outage_aborts_the_pass_before_relocation() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("a1", "A.jpg", Some(1), "image/jpeg"));
        ledger.set_offline(true);

        let err = stage(&directory, &ledger)
            .discover_and_register(WATCHED)
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(directory.entries(WATCHED).len(), 1);
    }

    #[tokio::test]
    async fn run_until_empty_drains_and_stops_when_stuck() {
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        directory.add_entry(WATCHED, RemoteEntry::new("a", "a.jpg", Some(1), "image/jpeg"));
        directory.add_entry(WATCHED, RemoteEntry::new("b", "b.jpg", Some(2), "image/jpeg"));
        let cancel = CancellationToken::new();

        let report = stage(&directory, &ledger)
            .run_until_empty(WATCHED, &cancel)
            .await
            .unwrap();
        assert_eq!(report.registered, 2);
        assert!(directory.entries(WATCHED).is_empty());

        directory.add_entry(WATCHED, RemoteEntry::new("c", "c.jpg", Some(3), "image/jpeg"));
        directory.fail_relocation("c");
        let report = stage(&directory, &ledger)
            .run_until_empty(WATCHED, &cancel)
            .await
            .unwrap();
        assert_eq!(report.relocation_failures, 1);
        assert_eq!(ledger.len(), 3);
    }
}
