//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use camd_core::{
    AccessMode, ArbiterError, ClientId, DeviceCommand, DeviceEvent, DeviceReply, ResourceId,
    ResourceInfo,
};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Request the ordered list of resources
    ListResources,

    /// Request the descriptor of one resource
    DescribeResource { resource_id: ResourceId },

    /// Open a resource for sole ownership
    OpenExclusive { resource_id: ResourceId },

    /// Open a shared connection on a resource
    OpenShared { resource_id: ResourceId },

    /// Tear down one handle opened on this connection
    Close { handle: ClientId },

    /// Forward a device command through a handle
    Control {
        handle: ClientId,
        #[serde(flatten)]
        command: DeviceCommand,
    },

    /// Take the shared exclusive lock (`wait` = block until available)
    ExclusiveLock {
        handle: ClientId,
        #[serde(default)]
        wait: bool,
    },

    /// Release the shared exclusive lock
    ExclusiveUnlock { handle: ClientId },

    /// Ask whether a handle holds the shared exclusive lock
    HasExclusiveLock { handle: ClientId },

    /// Request a diagnostic snapshot of the arbitration state
    DumpState,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully, closing all its handles
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn list_resources() -> Self {
        Self::new(MessageType::ListResources)
    }

    pub fn describe_resource(resource_id: ResourceId) -> Self {
        Self::new(MessageType::DescribeResource { resource_id })
    }

    /// Creates an open request for the given access mode.
    pub fn open(resource_id: ResourceId, mode: AccessMode) -> Self {
        match mode {
            AccessMode::Exclusive => Self::new(MessageType::OpenExclusive { resource_id }),
            AccessMode::Shared => Self::new(MessageType::OpenShared { resource_id }),
        }
    }

    pub fn close(handle: ClientId) -> Self {
        Self::new(MessageType::Close { handle })
    }

    pub fn control(handle: ClientId, command: DeviceCommand) -> Self {
        Self::new(MessageType::Control { handle, command })
    }

    pub fn exclusive_lock(handle: ClientId, wait: bool) -> Self {
        Self::new(MessageType::ExclusiveLock { handle, wait })
    }

    pub fn exclusive_unlock(handle: ClientId) -> Self {
        Self::new(MessageType::ExclusiveUnlock { handle })
    }

    pub fn has_exclusive_lock(handle: ClientId) -> Self {
        Self::new(MessageType::HasExclusiveLock { handle })
    }

    pub fn dump_state() -> Self {
        Self::new(MessageType::DumpState)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// All resources, ordered by id
    ResourceList { resources: Vec<ResourceInfo> },

    /// One resource descriptor
    Resource { resource: ResourceInfo },

    /// A handle was opened
    Opened {
        handle: ClientId,
        resource_id: ResourceId,
        mode: AccessMode,
    },

    /// A handle was closed
    Closed { handle: ClientId },

    /// Result of a device command
    ControlResult {
        handle: ClientId,
        #[serde(flatten)]
        reply: DeviceReply,
    },

    /// Current exclusive-lock state of a handle
    LockResult { handle: ClientId, held: bool },

    /// Diagnostic snapshot
    StateDump { text: String },

    /// Asynchronous device or lock event for a handle
    DeviceEvent {
        handle: ClientId,
        resource_id: ResourceId,
        #[serde(flatten)]
        event: DeviceEvent,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn resource_list(resources: Vec<ResourceInfo>) -> Self {
        Self::ResourceList { resources }
    }

    pub fn opened(handle: ClientId, resource_id: ResourceId, mode: AccessMode) -> Self {
        Self::Opened {
            handle,
            resource_id,
            mode,
        }
    }

    pub fn device_event(handle: ClientId, resource_id: ResourceId, event: DeviceEvent) -> Self {
        Self::DeviceEvent {
            handle,
            resource_id,
            event,
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Maps an arbitration failure onto a coded error response.
    pub fn arbiter_error(err: &ArbiterError) -> Self {
        Self::error_with_code(&err.to_string(), err.code())
    }

    /// Returns true for unsolicited messages that do not answer a request.
    pub fn is_event(&self) -> bool {
        matches!(self, Self::DeviceEvent { .. })
    }
}
