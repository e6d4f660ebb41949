use ferry_core::{ErrorClass, LogLevel};
use ferry_db::LedgerError;
use ferry_drive::RemoteError;
use ferry_storage::StorageError;
use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("record {identity_key} has no destination key")]
    MissingDestination { identity_key: String },

    #[error("destination of {identity_key} changed after {written} was written")]
    DestinationChanged { identity_key: String, written: String },

    #[error("size mismatch for {identity_key}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        identity_key: String,
        expected: u64,
        actual: u64,
    },
}

impl MigrationError {
    /// Ledger connectivity loss ends the current loop iteration.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, MigrationError::Ledger(e) if e.is_connectivity())
    }
}

impl ErrorClass for MigrationError {
    fn is_transient(&self) -> bool {
        match self {
            MigrationError::Ledger(e) => e.is_transient(),
            MigrationError::Storage(e) => e.is_transient(),
            MigrationError::Remote(e) => e.is_transient(),
            // The remote may have reported a stale size; a later attempt re-reads it.
            MigrationError::SizeMismatch { .. } => true,
            // The next claim picks up the new destination.
            MigrationError::DestinationChanged { .. } => true,
            MigrationError::MissingDestination { .. } => false,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            MigrationError::Ledger(e) => e.error_code(),
            MigrationError::Storage(e) => e.error_code(),
            MigrationError::Remote(e) => e.error_code(),
            MigrationError::MissingDestination { .. } => "TRANSFER_MISSING_DESTINATION",
            MigrationError::SizeMismatch { .. } => "TRANSFER_SIZE_MISMATCH",
            MigrationError::DestinationChanged { .. } => "TRANSFER_DESTINATION_CHANGED",
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            MigrationError::Ledger(e) => e.log_level(),
            MigrationError::Storage(e) => e.log_level(),
            MigrationError::Remote(e) => e.log_level(),
            _ => LogLevel::Error,
        }
    }
}

/// Emit `err` at the level it classifies itself with.
pub(crate) fn log_error(err: &MigrationError, message: &str) {
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(error = %err, code = err.error_code(), "{}", message),
        LogLevel::Warn => tracing::warn!(error = %err, code = err.error_code(), "{}", message),
        LogLevel::Error => tracing::error!(error = %err, code = err.error_code(), "{}", message),
    }
}
