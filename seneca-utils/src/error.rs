//! Error types for seneca
//!
//! Provides a unified error type used across all seneca crates. The
//! connection-layer variants double as the failure taxonomy that both
//! transports surface to the connection manager.

use std::path::PathBuf;

/// Remote error code the orchestrator uses for an invalidated session token
pub const SESSION_EXPIRED_CODE: i64 = -32001;

/// Remote error message the orchestrator uses for an invalidated session token
pub const SESSION_EXPIRED_MESSAGE: &str = "session_expired";

/// Main error type for seneca operations
#[derive(Debug, thiserror::Error)]
pub enum SenecaError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection timeout after {millis}ms")]
    ConnectionTimeout { millis: u64 },

    #[error("Transport closed")]
    TransportClosed,

    #[error("Call to {operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Not connected (state: {state})")]
    NotConnected { state: String },

    // === Session Errors ===

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Operation not permitted for this client: {0}")]
    OperationNotPermitted(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SenecaError {
    /// Create a connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a remote error
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Create the remote error reported for an invalidated session token
    pub fn session_expired() -> Self {
        Self::remote(SESSION_EXPIRED_CODE, SESSION_EXPIRED_MESSAGE)
    }

    /// Check if the remote reported that our session token is no longer valid
    pub fn is_session_expired(&self) -> bool {
        match self {
            Self::Remote { code, message } => {
                *code == SESSION_EXPIRED_CODE || message == SESSION_EXPIRED_MESSAGE
            }
            _ => false,
        }
    }
}

/// Result type alias using SenecaError
pub type Result<T> = std::result::Result<T, SenecaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SenecaError::OperationNotPermitted("create_project".into());
        assert_eq!(
            err.to_string(),
            "Operation not permitted for this client: create_project"
        );
    }

    #[test]
    fn test_remote_display() {
        let err = SenecaError::remote(-32602, "bad params");
        assert_eq!(err.to_string(), "Remote error -32602: bad params");
    }

    #[test]
    fn test_session_expired_by_code_or_message() {
        assert!(SenecaError::remote(SESSION_EXPIRED_CODE, "whatever").is_session_expired());
        assert!(SenecaError::remote(-1, "session_expired").is_session_expired());
        assert!(!SenecaError::remote(-1, "other").is_session_expired());
        assert!(!SenecaError::TransportClosed.is_session_expired());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: SenecaError = io_err.into();
        assert!(matches!(err, SenecaError::Io(_)));
    }
}
