use ferry_core::{ErrorClass, LogLevel};
use thiserror::Error;

/// Remote directory errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Entry not found: {0}")]
    NotFound(String),

    /// The byte stream broke off after `bytes_read` bytes.
    #[error("Stream interrupted after {bytes_read} bytes: {message}")]
    Stream { bytes_read: u64, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

impl RemoteError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl ErrorClass for RemoteError {
    fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http(e) => !e.is_builder() && !e.is_decode(),
            // Rate limiting, request timeout and server-side failures.
            RemoteError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            RemoteError::Stream { .. } => true,
            RemoteError::NotFound(_) | RemoteError::Malformed(_) | RemoteError::Credential(_) => {
                false
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            RemoteError::Http(_) => "REMOTE_HTTP_ERROR",
            RemoteError::Status { status: 429, .. } => "REMOTE_RATE_LIMITED",
            RemoteError::Status { status: 401 | 403, .. } => "REMOTE_UNAUTHORIZED",
            RemoteError::Status { .. } => "REMOTE_STATUS_ERROR",
            RemoteError::NotFound(_) => "REMOTE_NOT_FOUND",
            RemoteError::Stream { .. } => "REMOTE_STREAM_INTERRUPTED",
            RemoteError::Malformed(_) => "REMOTE_MALFORMED_RESPONSE",
            RemoteError::Credential(_) => "REMOTE_CREDENTIAL_ERROR",
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            RemoteError::NotFound(_) => LogLevel::Debug,
            e if e.is_transient() => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// Result type for remote directory operations
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> RemoteError {
        RemoteError::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert_eq!(status(429).error_code(), "REMOTE_RATE_LIMITED");
    }

    #[test]
    fn auth_failures_are_permanent() {
        assert!(!status(401).is_transient());
        assert!(!status(403).is_transient());
        assert_eq!(status(403).error_code(), "REMOTE_UNAUTHORIZED");
    }

    #[test]
    fn interrupted_streams_are_transient() {
        let err = RemoteError::Stream {
            bytes_read: 10,
            message: "reset".to_string(),
        };
        assert!(err.is_transient());
        assert_eq!(RemoteError::NotFound("x".to_string()).log_level(), LogLevel::Debug);
    }
}
