use serde::{Deserialize, Serialize};

/// One entry returned by a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Stable identifier assigned by the remote directory.
    pub identity_key: String,
    pub name: String,
    /// Reported size. Native documents have none.
    pub size_bytes: Option<u64>,
    pub mime_type: String,
}

/// Grouping key for duplicate detection: (name, size, type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl RemoteEntry {
    pub fn new(
        identity_key: impl Into<String>,
        name: impl Into<String>,
        size_bytes: Option<u64>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            identity_key: identity_key.into(),
            name: name.into(),
            size_bytes,
            mime_type: mime_type.into(),
        }
    }

    /// A missing size groups with size zero, as the listing reports it.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            name: self.name.clone(),
            size_bytes: self.size_bytes.unwrap_or(0),
            mime_type: self.mime_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_ignores_identity() {
        let a = RemoteEntry::new("id-1", "A.jpg", Some(100), "image/jpeg");
        let b = RemoteEntry::new("id-2", "A.jpg", Some(100), "image/jpeg");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_distinguishes_size_and_type() {
        let a = RemoteEntry::new("id-1", "A.jpg", Some(100), "image/jpeg");
        let bigger = RemoteEntry::new("id-2", "A.jpg", Some(101), "image/jpeg");
        let other_type = RemoteEntry::new("id-3", "A.jpg", Some(100), "image/png");
        assert_ne!(a.dedup_key(), bigger.dedup_key());
        assert_ne!(a.dedup_key(), other_type.dedup_key());
    }

    #[test]
    fn missing_size_groups_as_zero() {
        let a = RemoteEntry::new("id-1", "Notes", None, "application/vnd.google-apps.document");
        let b = RemoteEntry::new("id-2", "Notes", Some(0), "application/vnd.google-apps.document");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
