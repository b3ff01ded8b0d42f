//! Error types for the camd control client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

// ============================================================================
// Control Client Error Type
// ============================================================================

/// Control client errors.
///
/// Connection errors suggest checking whether the daemon is running;
/// daemon-side failures carry the daemon's stable error code.
#[derive(Error, Debug)]
pub enum CtlError {
    /// Failed to reach the daemon socket.
    #[error("Failed to connect to daemon at {path}: {reason}")]
    DaemonConnection { path: String, reason: String },

    /// The daemon refused the handshake.
    #[error("Daemon rejected connection: {0}")]
    Rejected(String),

    /// The daemon answered a request with an error.
    #[error("Daemon error{}: {message}", code_suffix(.code))]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// The daemon answered with a message that does not fit the request.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The daemon closed the connection.
    #[error("Daemon closed the connection")]
    Closed,

    /// No reply arrived in time.
    #[error("Timed out waiting for daemon")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CtlError {
    /// Returns the daemon's error code, if this is a daemon-side failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

/// Convenience Result type alias for control client operations.
pub type Result<T> = std::result::Result<T, CtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_error_display_with_code() {
        let error = CtlError::Daemon {
            message: "resource 0 is busy".to_string(),
            code: Some("already_busy".to_string()),
        };
        assert_eq!(error.to_string(), "Daemon error [already_busy]: resource 0 is busy");
        assert_eq!(error.code(), Some("already_busy"));
    }

    #[test]
    fn test_daemon_error_display_without_code() {
        let error = CtlError::Daemon {
            message: "boom".to_string(),
            code: None,
        };
        assert_eq!(error.to_string(), "Daemon error: boom");
        assert_eq!(error.code(), None);
    }

    #[test]
    fn test_connection_error_display() {
        let error = CtlError::DaemonConnection {
            path: "/tmp/camd.sock".to_string(),
            reason: "refused".to_string(),
        };
        let display = error.to_string();
        assert!(display.contains("/tmp/camd.sock"));
        assert!(display.contains("refused"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket not found");
        let error: CtlError = io_error.into();
        assert!(matches!(error, CtlError::Io(_)));
        assert!(error.code().is_none());
    }
}
