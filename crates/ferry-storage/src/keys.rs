//! Destination key checks shared by every backend.

use crate::traits::{StorageError, StorageResult};

/// Reject keys that are blank, absolute, or that could escape the bucket/root.
pub fn validate_destination_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("Destination key is empty".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(format!(
            "Destination key contains invalid characters: {key}"
        )));
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(StorageError::InvalidKey(format!(
            "Destination key contains relative segments: {key}"
        )));
    }
    if key.ends_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "Destination key names a directory: {key}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_destination_key("media/2024/03/beach.jpg").is_ok());
        assert!(validate_destination_key("clip..final.mp4").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        for key in ["", "  ", "/etc/passwd", "media/../secret", "./a", "a\\b", "media/"] {
            assert!(
                matches!(validate_destination_key(key), Err(StorageError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
