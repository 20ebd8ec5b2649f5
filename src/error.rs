//! ConfigSync Error Types

use thiserror::Error;

/// Result type alias for ConfigSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// ConfigSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Scroll context {0} expired or unknown")]
    ScrollExpired(String),

    #[error("Content encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    // Caller input errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not found.")]
    NotFound(String),

    // Cluster errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Broadcast of {action} failed on node {node}: {reason}")]
    BroadcastFailed {
        action: String,
        node: String,
        reason: String,
    },

    #[error("Remote error from {node}: {message}")]
    Remote { node: String, message: String },

    #[error("Timed out waiting for cluster status {0}")]
    WaitTimeout(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Wire serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Sync errors
    #[error("Failed to materialize {path}: {reason}")]
    Materialize { path: String, reason: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }

    /// Check if this error was caused by bad caller input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_) | Error::NotFound(_) | Error::Encoding(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                Error::StoreUnavailable(format!("SQLite error: {}", e))
            }
            _ => Error::Store(format!("SQLite error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::StoreUnavailable("busy".into()).is_retryable());
        assert!(Error::ConnectionTimeout("node-2:9301".into()).is_retryable());
        assert!(!Error::InvalidRequest("path is empty.".into()).is_retryable());

        assert!(Error::InvalidRequest("path is empty.".into()).is_client_error());
        assert!(!Error::Store("disk".into()).is_client_error());
    }

    #[test]
    fn test_not_found_message() {
        let e = Error::NotFound("conf/a.txt".into());
        assert_eq!(e.to_string(), "conf/a.txt is not found.");
    }
}
