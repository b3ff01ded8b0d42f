//! Domain-specific error types following panic-free policy.

use crate::resource::ResourceId;
use crate::ClientId;
use thiserror::Error;

/// Errors returned by arbitration entry points and client operations.
///
/// Every variant carries a stable wire code (see [`ArbiterError::code`]) so
/// remote callers can branch on the failure kind without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// Resource index outside the fixed range. Caller bug, not retried.
    #[error("invalid resource id {resource} (have {count} resources)")]
    InvalidId { resource: ResourceId, count: usize },

    /// The resource is exclusively held. Callers may retry after a backoff.
    #[error("resource {resource} is busy")]
    AlreadyBusy { resource: ResourceId },

    /// The hardware driver refused or failed to open the device.
    #[error("resource {resource} unavailable: {reason}")]
    ResourceUnavailable { resource: ResourceId, reason: String },

    /// The client has started (or finished) teardown.
    #[error("client {client} is disconnected")]
    Disconnected { client: ClientId },

    /// Unlock attempted by a client that does not hold the exclusive lock.
    #[error("client {client} does not hold the exclusive lock on resource {resource}")]
    NotHolder { client: ClientId, resource: ResourceId },

    /// Non-blocking exclusive lock attempt lost to another holder.
    #[error("exclusive lock on resource {resource} is already held")]
    AlreadyLocked { resource: ResourceId },

    /// The caller is not allowed to use the service.
    #[error("permission denied for pid {pid} (uid {uid})")]
    PermissionDenied { pid: u32, uid: u32 },

    /// The command is not valid for this connection variant.
    #[error("command {command} is not supported by {variant} clients")]
    UnsupportedCommand {
        command: &'static str,
        variant: &'static str,
    },
}

impl ArbiterError {
    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidId { .. } => "invalid_id",
            Self::AlreadyBusy { .. } => "already_busy",
            Self::ResourceUnavailable { .. } => "resource_unavailable",
            Self::Disconnected { .. } => "disconnected",
            Self::NotHolder { .. } => "not_holder",
            Self::AlreadyLocked { .. } => "already_locked",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::UnsupportedCommand { .. } => "unsupported_command",
        }
    }

    /// Returns true if the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AlreadyBusy { .. } | Self::AlreadyLocked { .. })
    }
}

/// Result type for arbitration operations.
pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Errors reported by a hardware driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("device {0} is busy")]
    Busy(ResourceId),

    #[error("device {0} is not present")]
    NotPresent(ResourceId),

    #[error("device I/O failed: {0}")]
    Io(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors reported by a sound loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoundError {
    #[error("sound not found: {0}")]
    NotFound(String),

    #[error("failed to load sound: {0}")]
    Load(String),
}

/// Errors reported by a death notifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeathError {
    /// The remote already terminated; no notification will ever fire.
    #[error("remote {0} is already dead")]
    RemoteDead(crate::RemoteHandle),
}

/// Errors that can occur in domain value parsing.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbiter_error_display() {
        let err = ArbiterError::AlreadyBusy {
            resource: ResourceId::new(0),
        };
        assert_eq!(err.to_string(), "resource 0 is busy");

        let err = ArbiterError::InvalidId {
            resource: ResourceId::new(7),
            count: 2,
        };
        assert_eq!(err.to_string(), "invalid resource id 7 (have 2 resources)");

        let err = ArbiterError::NotHolder {
            client: ClientId::new(3),
            resource: ResourceId::new(1),
        };
        assert_eq!(
            err.to_string(),
            "client #3 does not hold the exclusive lock on resource 1"
        );
    }

    #[test]
    fn test_arbiter_error_codes() {
        let cases = [
            (
                ArbiterError::InvalidId {
                    resource: ResourceId::new(9),
                    count: 2,
                },
                "invalid_id",
            ),
            (
                ArbiterError::Disconnected {
                    client: ClientId::new(1),
                },
                "disconnected",
            ),
            (
                ArbiterError::PermissionDenied { pid: 1, uid: 2 },
                "permission_denied",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_transient_errors() {
        assert!(ArbiterError::AlreadyBusy {
            resource: ResourceId::new(0)
        }
        .is_transient());
        assert!(!ArbiterError::Disconnected {
            client: ClientId::new(0)
        }
        .is_transient());
    }
}
