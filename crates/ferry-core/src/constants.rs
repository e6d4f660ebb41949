//! Pipeline-wide constants.

/// Default size of one transfer chunk (10 MiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Smallest chunk size S3 accepts for every multipart part but the last.
pub const MIN_CHUNK_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Number of records pulled from the ledger per transfer batch.
pub const DEFAULT_TRANSFER_BATCH_SIZE: i64 = 10;

/// Google Drive v3 REST endpoint.
pub const DEFAULT_DRIVE_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

/// Structured-document MIME types that are routed aside instead of transferred.
pub const DEFAULT_DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
];

/// Ledger table holding one row per admitted remote file.
pub const FILE_RECORDS_TABLE: &str = "file_records";
