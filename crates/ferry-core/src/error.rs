//! Error classification shared across crates
//!
//! Each crate defines its own `thiserror` enum at its seam (ledger, blob store,
//! remote directory). They all implement [`ErrorClass`] so the pipeline can
//! decide between "leave the record untouched and retry on a later pass" and
//! "skip and report" without knowing which backend failed.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected conditions such as an entry already moved
    Debug,
    /// Transient failures that a later pass will retry
    Warn,
    /// Failures that need an operator
    Error,
}

/// Self-description of an error for pipeline control flow.
pub trait ErrorClass {
    /// Whether the failed operation may succeed if attempted again later
    /// (network errors, rate limiting, partial chunk failures).
    fn is_transient(&self) -> bool;

    /// Machine-readable error code (e.g., "REMOTE_RATE_LIMITED")
    fn error_code(&self) -> &'static str;

    /// Log level for this error
    fn log_level(&self) -> LogLevel {
        if self.is_transient() {
            LogLevel::Warn
        } else {
            LogLevel::Error
        }
    }
}
