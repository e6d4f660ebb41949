//! Classification of remote entries at discovery time.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::remote_entry::RemoteEntry;
use crate::constants::DEFAULT_DOCUMENT_MIME_TYPES;

/// Category stored in the ledger's `category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Binary,
    Document,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Binary => "binary",
            FileCategory::Document => "document",
        }
    }
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(FileCategory::Image),
            "video" => Ok(FileCategory::Video),
            "audio" => Ok(FileCategory::Audio),
            "binary" => Ok(FileCategory::Binary),
            "document" => Ok(FileCategory::Document),
            _ => Err(anyhow::anyhow!("Invalid file category: {}", s)),
        }
    }
}

/// Maps MIME types to categories.
#[derive(Debug, Clone)]
pub struct Classifier {
    document_mime_types: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_DOCUMENT_MIME_TYPES.iter().map(|s| s.to_string()))
    }
}

impl Classifier {
    pub fn new(document_mime_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            document_mime_types: document_mime_types
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, entry: &RemoteEntry) -> FileCategory {
        let mime = entry.mime_type.trim().to_lowercase();
        if self.document_mime_types.iter().any(|d| *d == mime) {
            return FileCategory::Document;
        }
        match mime.split('/').next() {
            Some("image") => FileCategory::Image,
            Some("video") => FileCategory::Video,
            Some("audio") => FileCategory::Audio,
            _ => FileCategory::Binary,
        }
    }
}

/// File extension without the dot, lowercased. `None` for names without one
/// and for dotfiles such as `.env`.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}
