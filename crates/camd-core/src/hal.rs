//! Hardware driver contract.
//!
//! The arbitrator never talks to a camera directly. It opens and closes
//! device sessions through a [`HardwareDriver`] and forwards control
//! commands to the session it opened. Drivers may block on hardware I/O;
//! the arbitrator guarantees it never calls them while holding its table
//! lock.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HalError;
use crate::resource::{ResourceId, ResourceInfo};

/// How a session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Exclusive,
    Shared,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => f.write_str("exclusive"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// A command forwarded to an open device session.
///
/// The first group is only valid on exclusive sessions, the request/stream
/// group only on shared sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    StartPreview,
    StopPreview,
    StartRecording,
    StopRecording,
    AutoFocus,
    CancelAutoFocus,
    TakePicture,
    SetParameters { params: String },
    GetParameters,
    SendCommand { cmd: i32, arg1: i32, arg2: i32 },

    SubmitRequest { metadata: String, streaming: bool },
    CancelRequest { request_id: i32 },
    RequestStream { stream_id: i32 },
    CancelStream { stream_id: i32 },
}

impl DeviceCommand {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartPreview => "start_preview",
            Self::StopPreview => "stop_preview",
            Self::StartRecording => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::AutoFocus => "auto_focus",
            Self::CancelAutoFocus => "cancel_auto_focus",
            Self::TakePicture => "take_picture",
            Self::SetParameters { .. } => "set_parameters",
            Self::GetParameters => "get_parameters",
            Self::SendCommand { .. } => "send_command",
            Self::SubmitRequest { .. } => "submit_request",
            Self::CancelRequest { .. } => "cancel_request",
            Self::RequestStream { .. } => "request_stream",
            Self::CancelStream { .. } => "cancel_stream",
        }
    }

    /// Returns the access mode whose sessions accept this command.
    pub fn mode(&self) -> AccessMode {
        match self {
            Self::SubmitRequest { .. }
            | Self::CancelRequest { .. }
            | Self::RequestStream { .. }
            | Self::CancelStream { .. } => AccessMode::Shared,
            _ => AccessMode::Exclusive,
        }
    }
}

/// Result of a device command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum DeviceReply {
    Done,
    Parameters { params: String },
    RequestId { request_id: i32 },
}

/// Lock transitions reported to shared clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Acquired,
    Released,
}

/// Asynchronous notification delivered to a client's callback channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    Shutter,
    Focus { success: bool },
    Error { code: i32 },
    RequestCompleted { request_id: i32 },
    LockStatus { status: LockStatus },
}

/// The hardware abstraction layer the arbitrator sits on.
pub trait HardwareDriver: Send + Sync {
    /// Number of devices the driver exposes.
    fn resource_count(&self) -> usize;

    /// Static information for one device.
    fn describe(&self, id: ResourceId) -> Result<ResourceInfo, HalError>;

    /// Opens a session on a device. May block.
    fn open(&self, id: ResourceId, mode: AccessMode) -> Result<Box<dyn DeviceSession>, HalError>;
}

/// One open session on a device.
pub trait DeviceSession: Send {
    /// Executes a command. May block on hardware I/O.
    fn execute(&mut self, command: &DeviceCommand) -> Result<DeviceReply, HalError>;

    /// Closes the session and releases the hardware.
    fn close(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_modes() {
        assert_eq!(DeviceCommand::TakePicture.mode(), AccessMode::Exclusive);
        assert_eq!(
            DeviceCommand::SubmitRequest {
                metadata: String::new(),
                streaming: false
            }
            .mode(),
            AccessMode::Shared
        );
        assert_eq!(
            DeviceCommand::CancelStream { stream_id: 1 }.mode(),
            AccessMode::Shared
        );
    }

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&DeviceCommand::SetParameters {
            params: "zoom=2".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"command":"set_parameters","params":"zoom=2"}"#);

        let parsed: DeviceCommand = serde_json::from_str(r#"{"command":"take_picture"}"#).unwrap();
        assert_eq!(parsed, DeviceCommand::TakePicture);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_string(&DeviceEvent::LockStatus {
            status: LockStatus::Acquired,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"lock_status","status":"acquired"}"#);
    }
}
