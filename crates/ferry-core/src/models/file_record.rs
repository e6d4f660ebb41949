use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::classification::{extension_of, FileCategory};
use super::remote_entry::RemoteEntry;

/// One ledger row per distinct remote file admitted into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Remote identity; unique across the ledger.
    pub identity_key: String,
    pub origin_name: String,
    pub origin_path: String,
    /// Locally generated correlation token.
    pub internal_id: Uuid,
    pub category: FileCategory,
    pub extension: Option<String>,
    /// Size reported at discovery time. Advisory.
    pub size_bytes: Option<i64>,
    /// Monotonic: only ever flips false -> true.
    pub transferred: bool,
    /// Owned by downstream processing; the pipeline never sets it.
    pub finalized: bool,
    /// Assigned by the external naming step. `None` means not ready for transfer.
    pub destination_key: Option<String>,
    pub new_name: Option<String>,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Non-blank destination key, if one has been assigned.
    pub fn destination(&self) -> Option<&str> {
        self.destination_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// A record is eligible for transfer iff it is not yet transferred and has
    /// a destination.
    pub fn is_eligible(&self) -> bool {
        !self.transferred && self.destination().is_some()
    }
}

/// Insert payload built by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFileRecord {
    pub identity_key: String,
    pub origin_name: String,
    pub origin_path: String,
    pub internal_id: Uuid,
    pub category: FileCategory,
    pub extension: Option<String>,
    pub size_bytes: Option<i64>,
}

impl NewFileRecord {
    /// Build the ledger row for a canonical entry found under `watch_location`.
    pub fn from_entry(entry: &RemoteEntry, category: FileCategory, watch_location: &str) -> Self {
        Self {
            identity_key: entry.identity_key.clone(),
            origin_name: entry.name.clone(),
            origin_path: format!("{}/{}", watch_location.trim_end_matches('/'), entry.name),
            internal_id: Uuid::new_v4(),
            category,
            extension: extension_of(&entry.name),
            size_bytes: entry.size_bytes.and_then(|s| i64::try_from(s).ok()),
        }
    }
}

/// Ledger counters for `ferry status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: i64,
    pub awaiting_destination: i64,
    pub eligible: i64,
    pub claimed: i64,
    pub transferred: i64,
    pub finalized: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(transferred: bool, destination_key: Option<&str>) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: 1,
            identity_key: "id-1".to_string(),
            origin_name: "A.jpg".to_string(),
            origin_path: "watched/A.jpg".to_string(),
            internal_id: Uuid::new_v4(),
            category: FileCategory::Image,
            extension: Some("jpg".to_string()),
            size_bytes: Some(100),
            transferred,
            finalized: false,
            destination_key: destination_key.map(String::from),
            new_name: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn eligibility_requires_destination_and_pending_status() {
        assert!(record(false, Some("media/2024/A.jpg")).is_eligible());
        assert!(!record(true, Some("media/2024/A.jpg")).is_eligible());
        assert!(!record(false, None).is_eligible());
        assert!(!record(false, Some("   ")).is_eligible());
    }

    #[test]
    fn new_record_from_entry() {
        let entry = RemoteEntry::new("drive-1", "Holiday.MP4", Some(2048), "video/mp4");
        let new = NewFileRecord::from_entry(&entry, FileCategory::Video, "watched/");
        assert_eq!(new.identity_key, "drive-1");
        assert_eq!(new.origin_path, "watched/Holiday.MP4");
        assert_eq!(new.extension.as_deref(), Some("mp4"));
        assert_eq!(new.size_bytes, Some(2048));
        assert_eq!(new.category, FileCategory::Video);
    }

    #[test]
    fn internal_ids_are_unique_per_insert() {
        let entry = RemoteEntry::new("drive-1", "a.bin", None, "application/octet-stream");
        let a = NewFileRecord::from_entry(&entry, FileCategory::Binary, "w");
        let b = NewFileRecord::from_entry(&entry, FileCategory::Binary, "w");
        assert_ne!(a.internal_id, b.internal_id);
        assert_eq!(a.size_bytes, None);
    }
}
