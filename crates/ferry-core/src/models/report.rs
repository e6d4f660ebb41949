//! Per-pass counters returned by each stage and logged for auditing.

use serde::{Deserialize, Serialize};

/// Outcome of one discovery pass over the watched location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Entries returned by the listing.
    pub listed: usize,
    /// Non-canonical entries routed to the duplicates area.
    pub duplicates: usize,
    /// Canonical structured documents routed to the documents area.
    pub documents: usize,
    /// Canonical entries inserted into the ledger and queued for transfer.
    pub registered: usize,
    /// Canonical entries whose identity was already in the ledger.
    pub already_registered: usize,
    /// Entries skipped because their metadata could not be classified.
    pub skipped: usize,
    /// Relocation calls that failed; the entry stays put and is seen again.
    pub relocation_failures: usize,
    /// Canonical entries held back because a duplicate of theirs could not be
    /// moved out of the watched location this pass.
    pub deferred: usize,
    /// Entries this pass actually moved out of the watched location.
    pub relocated: usize,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.listed == 0
    }

    /// Canonical entries that ended up queued, new or not.
    pub fn queued(&self) -> usize {
        self.registered + self.already_registered
    }

    /// At least one entry left the watched location. A pass without progress
    /// would see the exact same listing again.
    pub fn made_progress(&self) -> bool {
        self.relocated > 0
    }

    pub fn merge(&mut self, other: &DiscoveryReport) {
        self.listed += other.listed;
        self.duplicates += other.duplicates;
        self.documents += other.documents;
        self.registered += other.registered;
        self.already_registered += other.already_registered;
        self.skipped += other.skipped;
        self.relocation_failures += other.relocation_failures;
        self.deferred += other.deferred;
        self.relocated += other.relocated;
    }
}

/// Outcome of a transfer batch or a whole transfer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub batches: usize,
    /// Records claimed from the ledger.
    pub selected: usize,
    pub transferred: usize,
    pub failed: usize,
    /// Records given up on for the rest of the run after repeated failures.
    pub exhausted: usize,
    pub bytes: u64,
}

impl TransferReport {
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }

    pub fn merge(&mut self, other: &TransferReport) {
        self.batches += other.batches;
        self.selected += other.selected;
        self.transferred += other.transferred;
        self.failed += other.failed;
        self.exhausted += other.exhausted;
        self.bytes += other.bytes;
    }
}

/// One driver pass: a discovery run followed by a transfer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub discovery: DiscoveryReport,
    pub transfer: TransferReport,
}

impl PassReport {
    /// Neither stage found work it could act on.
    pub fn is_idle(&self) -> bool {
        !self.discovery.made_progress() && self.transfer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counters() {
        let mut total = DiscoveryReport::default();
        total.merge(&DiscoveryReport {
            listed: 3,
            duplicates: 1,
            documents: 1,
            registered: 1,
            ..Default::default()
        });
        total.merge(&DiscoveryReport {
            listed: 1,
            already_registered: 1,
            ..Default::default()
        });
        assert_eq!(total.listed, 4);
        assert_eq!(total.queued(), 2);
    }

    #[test]
    fn idle_pass_needs_both_stages_empty() {
        let mut pass = PassReport::default();
        assert!(pass.is_idle());
        pass.transfer.selected = 1;
        assert!(!pass.is_idle());
    }

    #[test]
    fn stuck_listing_counts_as_idle() {
        let mut pass = PassReport::default();
        pass.discovery.listed = 2;
        pass.discovery.relocation_failures = 2;
        assert!(pass.is_idle());
        pass.discovery.relocated = 1;
        assert!(!pass.is_idle());
    }
}
