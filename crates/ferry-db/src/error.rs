use ferry_core::{ErrorClass, LogLevel};
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The database could not be reached. Fatal to the current loop iteration.
    #[error("ledger unreachable: {0}")]
    Connectivity(#[source] sqlx::Error),

    #[error("ledger query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("schema bootstrap failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no record with identity key {0}")]
    NotFound(String),

    #[error("record {0} is already transferred; its destination cannot change")]
    AlreadyTransferred(String),

    #[error("record {0} is being transferred; retry once the claim is released")]
    Claimed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LedgerError::Connectivity(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => LedgerError::Connectivity(err),
            other => LedgerError::Query(other),
        }
    }
}

impl ErrorClass for LedgerError {
    fn is_transient(&self) -> bool {
        self.is_connectivity()
    }

    fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Connectivity(_) => "LEDGER_UNREACHABLE",
            LedgerError::Query(_) => "LEDGER_QUERY_FAILED",
            LedgerError::Migration(_) => "LEDGER_MIGRATION_FAILED",
            LedgerError::NotFound(_) => "LEDGER_RECORD_NOT_FOUND",
            LedgerError::AlreadyTransferred(_) => "LEDGER_RECORD_TRANSFERRED",
            LedgerError::Claimed(_) => "LEDGER_RECORD_CLAIMED",
            LedgerError::InvalidInput(_) => "LEDGER_INVALID_INPUT",
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            LedgerError::NotFound(_)
            | LedgerError::AlreadyTransferred(_)
            | LedgerError::Claimed(_) => LogLevel::Debug,
            LedgerError::Connectivity(_) => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
