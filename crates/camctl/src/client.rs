//! Request/response client for the camd daemon.
//!
//! This module provides the `ControlClient` which handles:
//! - Connection and handshake over the daemon's Unix socket
//! - One request at a time, matched to its reply
//! - Setting aside `device_event` messages that arrive in between
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{CtlError, Result};
use camd_core::{AccessMode, ClientId, DeviceCommand, DeviceEvent, DeviceReply, ResourceId, ResourceInfo};
use camd_protocol::{ClientMessage, DaemonMessage};

/// Default socket path, shared with the daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/camd.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "CAMD_SOCKET";

/// How long a single request may wait for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket path from `CAMD_SOCKET`, or the default.
pub fn default_socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// An asynchronous event for one of this connection's handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEvent {
    pub handle: ClientId,
    pub resource: ResourceId,
    pub event: DeviceEvent,
}

/// Connected, handshaken client.
///
/// Every handle opened through a `ControlClient` belongs to its socket:
/// dropping the client releases them on the daemon side.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending_events: VecDeque<HandleEvent>,
    reply_timeout: Duration,
    client_id: String,
}

impl ControlClient {
    /// Connects to the daemon and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `CtlError::DaemonConnection` if the socket cannot be reached
    /// - `CtlError::Rejected` if the daemon refuses the protocol version
    pub async fn connect(socket_path: impl AsRef<Path>, name: Option<String>) -> Result<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| CtlError::DaemonConnection {
                path: socket_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            pending_events: VecDeque::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            client_id: String::new(),
        };

        match client.request(ClientMessage::connect(name)).await? {
            DaemonMessage::Connected { client_id, .. } => {
                debug!(client_id = %client_id, "Connected to daemon");
                client.client_id = client_id;
                Ok(client)
            }
            DaemonMessage::Rejected { reason, .. } => Err(CtlError::Rejected(reason)),
            other => Err(unexpected(&other)),
        }
    }

    /// Changes how long requests wait for their reply.
    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Name the daemon assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sends a request and waits for the next non-event reply.
    ///
    /// `error` replies are turned into `CtlError::Daemon`.
    pub async fn request(&mut self, msg: ClientMessage) -> Result<DaemonMessage> {
        self.send(&msg).await?;
        loop {
            let reply = timeout(self.reply_timeout, self.read())
                .await
                .map_err(|_| CtlError::Timeout)??;
            match reply {
                DaemonMessage::DeviceEvent {
                    handle,
                    resource_id,
                    event,
                } => {
                    trace!(handle = %handle, "Event set aside while waiting for reply");
                    self.pending_events.push_back(HandleEvent {
                        handle,
                        resource: resource_id,
                        event,
                    });
                }
                DaemonMessage::Error { message, code } => {
                    return Err(CtlError::Daemon { message, code });
                }
                other => return Ok(other),
            }
        }
    }

    /// Returns the next device event, waiting up to `wait` for one.
    pub async fn next_event(&mut self, wait: Duration) -> Result<Option<HandleEvent>> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }
        match timeout(wait, self.read()).await {
            Err(_) => Ok(None),
            Ok(Ok(DaemonMessage::DeviceEvent {
                handle,
                resource_id,
                event,
            })) => Ok(Some(HandleEvent {
                handle,
                resource: resource_id,
                event,
            })),
            Ok(Ok(other)) => Err(unexpected(&other)),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Drains events that arrived while waiting for replies.
    pub fn take_pending_events(&mut self) -> Vec<HandleEvent> {
        self.pending_events.drain(..).collect()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub async fn list_resources(&mut self) -> Result<Vec<ResourceInfo>> {
        match self.request(ClientMessage::list_resources()).await? {
            DaemonMessage::ResourceList { resources } => Ok(resources),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn describe_resource(&mut self, resource: ResourceId) -> Result<ResourceInfo> {
        match self.request(ClientMessage::describe_resource(resource)).await? {
            DaemonMessage::Resource { resource } => Ok(resource),
            other => Err(unexpected(&other)),
        }
    }

    /// Opens a handle on `resource`.
    pub async fn open(&mut self, resource: ResourceId, mode: AccessMode) -> Result<ClientId> {
        match self.request(ClientMessage::open(resource, mode)).await? {
            DaemonMessage::Opened { handle, .. } => Ok(handle),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn close(&mut self, handle: ClientId) -> Result<()> {
        match self.request(ClientMessage::close(handle)).await? {
            DaemonMessage::Closed { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn control(&mut self, handle: ClientId, command: DeviceCommand) -> Result<DeviceReply> {
        match self.request(ClientMessage::control(handle, command)).await? {
            DaemonMessage::ControlResult { reply, .. } => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }

    /// Takes the exclusive lock on a shared handle. Returns whether it is held.
    pub async fn exclusive_lock(&mut self, handle: ClientId, wait: bool) -> Result<bool> {
        self.lock_request(ClientMessage::exclusive_lock(handle, wait)).await
    }

    pub async fn exclusive_unlock(&mut self, handle: ClientId) -> Result<bool> {
        self.lock_request(ClientMessage::exclusive_unlock(handle)).await
    }

    pub async fn has_exclusive_lock(&mut self, handle: ClientId) -> Result<bool> {
        self.lock_request(ClientMessage::has_exclusive_lock(handle)).await
    }

    pub async fn dump_state(&mut self) -> Result<String> {
        match self.request(ClientMessage::dump_state()).await? {
            DaemonMessage::StateDump { text } => Ok(text),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn ping(&mut self, seq: u64) -> Result<u64> {
        match self.request(ClientMessage::ping(seq)).await? {
            DaemonMessage::Pong { seq } => Ok(seq),
            other => Err(unexpected(&other)),
        }
    }

    /// Says goodbye. The daemon closes every handle of this connection.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;
        // Wait for the daemon to hang up so the handles are gone on return
        loop {
            match timeout(self.reply_timeout, self.read()).await {
                Err(_) => return Err(CtlError::Timeout),
                Ok(Err(CtlError::Closed)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(_)) => continue,
            }
        }
    }

    async fn lock_request(&mut self, msg: ClientMessage) -> Result<bool> {
        match self.request(msg).await? {
            DaemonMessage::LockResult { held, .. } => Ok(held),
            other => Err(unexpected(&other)),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(CtlError::Closed);
        }
        Ok(serde_json::from_str(&line)?)
    }
}

fn unexpected(msg: &DaemonMessage) -> CtlError {
    CtlError::UnexpectedReply(format!("{msg:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_reply_names_message() {
        let err = unexpected(&DaemonMessage::pong(3));
        assert!(err.to_string().contains("Pong"));
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");

        match ControlClient::connect(&path, None).await {
            Err(CtlError::DaemonConnection { path: p, .. }) => {
                assert!(p.ends_with("absent.sock"));
            }
            Err(other) => panic!("Expected DaemonConnection, got {other:?}"),
            Ok(_) => panic!("Expected connection failure"),
        }
    }
}
