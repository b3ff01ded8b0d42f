//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes requests to the arbitrator on the blocking pool
//! - Keeps the handles this connection opened, and only those
//! - Forwards device events for those handles
//!
//! Outgoing messages are queued on an unbounded channel drained by a
//! writer task, so event callbacks from HAL threads never wait on the
//! socket.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use camd_core::{
    AccessMode, ArbiterError, CallerIdentity, CallerRef, ClientCallbacks, ClientId, DeviceCommand,
    DeviceEvent, RemoteHandle, ResourceId,
};
use camd_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::arbiter::{Arbitrator, Connection, SharedClient};
use crate::remote::LocalDeathNotifier;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Outbound = mpsc::UnboundedSender<DaemonMessage>;

/// Event channel shared by every handle of one connection.
struct EventForwarder {
    outbound: Outbound,
}

impl ClientCallbacks for EventForwarder {
    fn on_device_event(&self, client: ClientId, resource: ResourceId, event: &DeviceEvent) {
        let msg = DaemonMessage::device_event(client, resource, event.clone());
        if self.outbound.send(msg).is_err() {
            trace!(client = %client, "Connection gone, event dropped");
        }
    }
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Queue drained by the writer task
    outbound: Outbound,

    writer_task: JoinHandle<()>,

    arbiter: Arc<Arbitrator>,

    notifier: Arc<LocalDeathNotifier>,

    callbacks: Arc<EventForwarder>,

    /// Credentials of the peer process
    identity: CallerIdentity,

    /// Remote handle standing for this connection
    remote: RemoteHandle,

    /// Handles opened through this connection
    handles: HashMap<ClientId, Connection>,

    /// Client name announced in the handshake
    client_id: Option<String>,

    /// Set once the peer said goodbye and its handles were closed
    retired: bool,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: UnixStream,
        arbiter: Arc<Arbitrator>,
        notifier: Arc<LocalDeathNotifier>,
        identity: CallerIdentity,
        remote: RemoteHandle,
        connection_number: u64,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let writer_task = spawn_writer(writer, rx, connection_number);

        Self {
            reader: BufReader::new(reader),
            callbacks: Arc::new(EventForwarder {
                outbound: outbound.clone(),
            }),
            outbound,
            writer_task,
            arbiter,
            notifier,
            identity,
            remote,
            handles: HashMap::new(),
            client_id: None,
            retired: false,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes messages until the
    /// connection closes. Whatever ends the connection, every handle it
    /// opened is gone when this returns.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(
                    client_id = ?self.client_id,
                    remote = %self.remote,
                    pid = self.identity.pid,
                    "Client handshake completed"
                );
                if let Err(e) = self.process_messages().await {
                    debug!(
                        client_id = ?self.client_id,
                        error = %e,
                        "Connection closed"
                    );
                }
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
            }
        }

        let client_id = self.client_id.take();
        let remote = self.remote;
        self.finish().await;
        info!(client_id = ?client_id, remote = %remote, "Client disconnected");
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message from the client, validates the protocol
    /// version, and responds with `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        if let Err(e) = msg.protocol_version.negotiate(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %msg.protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))?;
            return Err(ConnectionError::VersionMismatch {
                client: msg.protocol_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    self.send_message(DaemonMessage::error_with_code(&reason, "parse_error"))?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if let Err(e) = self.handle_message(msg).await {
                if matches!(e, ConnectionError::Goodbye) {
                    return Ok(());
                }
                error!(
                    client_id = ?self.client_id,
                    error = %e,
                    "Error handling message"
                );
                let _ = self.send_message(DaemonMessage::error(&e.to_string()));
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))?;
            }

            MessageType::ListResources => {
                let resources = self.arbiter.enumerate_resources();
                self.send_message(DaemonMessage::resource_list(resources))?;
            }

            MessageType::DescribeResource { resource_id } => {
                let reply = match self.arbiter.describe_resource(resource_id) {
                    Ok(resource) => DaemonMessage::Resource { resource },
                    Err(e) => DaemonMessage::arbiter_error(&e),
                };
                self.send_message(reply)?;
            }

            MessageType::OpenExclusive { resource_id } => {
                self.handle_open(resource_id, AccessMode::Exclusive).await?;
            }

            MessageType::OpenShared { resource_id } => {
                self.handle_open(resource_id, AccessMode::Shared).await?;
            }

            MessageType::Close { handle } => match self.handles.remove(&handle) {
                Some(connection) => {
                    run_blocking(move || connection.disconnect()).await?;
                    self.send_message(DaemonMessage::Closed { handle })?;
                }
                None => self.send_unknown_handle(handle)?,
            },

            MessageType::Control { handle, command } => {
                self.handle_control(handle, command).await?;
            }

            MessageType::ExclusiveLock { handle, wait } => {
                self.handle_lock(handle, wait).await?;
            }

            MessageType::ExclusiveUnlock { handle } => {
                let Some(client) = self.shared_handle(handle, "exclusive_unlock")? else {
                    return Ok(());
                };
                let reply = match run_blocking(move || client.exclusive_unlock()).await? {
                    Ok(()) => DaemonMessage::LockResult {
                        handle,
                        held: false,
                    },
                    Err(e) => DaemonMessage::arbiter_error(&e),
                };
                self.send_message(reply)?;
            }

            MessageType::HasExclusiveLock { handle } => {
                let Some(client) = self.shared_handle(handle, "has_exclusive_lock")? else {
                    return Ok(());
                };
                let held = client.has_exclusive_lock();
                self.send_message(DaemonMessage::LockResult { handle, held })?;
            }

            MessageType::DumpState => {
                let arbiter = Arc::clone(&self.arbiter);
                let text = run_blocking(move || arbiter.dump_state()).await?;
                self.send_message(DaemonMessage::StateDump { text })?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq))?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                self.close_all().await;
                self.notifier.retire(&self.remote);
                self.retired = true;
                return Err(ConnectionError::Goodbye);
            }
        }

        Ok(())
    }

    async fn handle_open(
        &mut self,
        resource: ResourceId,
        mode: AccessMode,
    ) -> Result<(), ConnectionError> {
        let caller = CallerRef::new(
            self.identity,
            self.remote,
            Arc::clone(&self.callbacks) as Arc<dyn ClientCallbacks>,
        );
        let arbiter = Arc::clone(&self.arbiter);

        let opened = run_blocking(move || match mode {
            AccessMode::Exclusive => arbiter
                .connect_exclusive(caller, resource)
                .map(Connection::Exclusive),
            AccessMode::Shared => arbiter
                .connect_shared(caller, resource)
                .map(Connection::Shared),
        })
        .await?;

        match opened {
            Ok(connection) => {
                let handle = connection.id();
                debug!(
                    client_id = ?self.client_id,
                    handle = %handle,
                    resource = %resource,
                    mode = %mode,
                    "Handle opened"
                );
                self.handles.insert(handle, connection);
                self.send_message(DaemonMessage::opened(handle, resource, mode))
            }
            Err(e) => self.send_message(DaemonMessage::arbiter_error(&e)),
        }
    }

    async fn handle_control(
        &mut self,
        handle: ClientId,
        command: DeviceCommand,
    ) -> Result<(), ConnectionError> {
        let Some(connection) = self.handles.get(&handle).cloned() else {
            return self.send_unknown_handle(handle);
        };

        let result = run_blocking(move || connection.execute(&command)).await?;
        match result {
            Ok(reply) => self.send_message(DaemonMessage::ControlResult { handle, reply }),
            Err(e) => {
                if matches!(e, ArbiterError::Disconnected { .. }) {
                    self.handles.remove(&handle);
                }
                self.send_message(DaemonMessage::arbiter_error(&e))
            }
        }
    }

    /// Takes the exclusive lock. A waiting request runs in its own task so
    /// this connection keeps serving other messages meanwhile.
    async fn handle_lock(&mut self, handle: ClientId, wait: bool) -> Result<(), ConnectionError> {
        let Some(client) = self.shared_handle(handle, "exclusive_lock")? else {
            return Ok(());
        };

        if !wait {
            let reply = match run_blocking(move || client.exclusive_try_lock()).await? {
                Ok(()) => DaemonMessage::LockResult { handle, held: true },
                Err(e) => DaemonMessage::arbiter_error(&e),
            };
            return self.send_message(reply);
        }

        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let reply = match tokio::task::spawn_blocking(move || client.exclusive_lock()).await {
                Ok(Ok(())) => DaemonMessage::LockResult { handle, held: true },
                Ok(Err(e)) => DaemonMessage::arbiter_error(&e),
                Err(e) => DaemonMessage::error(&format!("lock task failed: {e}")),
            };
            let _ = outbound.send(reply);
        });
        Ok(())
    }

    /// Resolves a handle that must be shared. Replies with an error and
    /// returns `None` otherwise.
    fn shared_handle(
        &self,
        handle: ClientId,
        command: &'static str,
    ) -> Result<Option<Arc<SharedClient>>, ConnectionError> {
        match self.handles.get(&handle) {
            Some(Connection::Shared(client)) => Ok(Some(Arc::clone(client))),
            Some(Connection::Exclusive(_)) => {
                let err = ArbiterError::UnsupportedCommand {
                    command,
                    variant: "exclusive",
                };
                self.send_message(DaemonMessage::arbiter_error(&err))?;
                Ok(None)
            }
            None => {
                self.send_unknown_handle(handle)?;
                Ok(None)
            }
        }
    }

    fn send_unknown_handle(&self, handle: ClientId) -> Result<(), ConnectionError> {
        self.send_message(DaemonMessage::error_with_code(
            &format!("unknown handle {handle}"),
            "unknown_handle",
        ))
    }

    /// Disconnects every handle this connection opened.
    async fn close_all(&mut self) {
        let handles: Vec<Connection> = self.handles.drain().map(|(_, c)| c).collect();
        if handles.is_empty() {
            return;
        }
        let count = handles.len();
        let result = run_blocking(move || {
            for connection in &handles {
                connection.disconnect();
            }
        })
        .await;
        if let Err(e) = result {
            error!(remote = %self.remote, error = %e, "Failed to close handles");
        }
        debug!(remote = %self.remote, count, "Closed connection handles");
    }

    /// Final cleanup. A peer that vanished without saying goodbye is
    /// reported dead so its clients are torn down by their death watchers.
    async fn finish(mut self) {
        if !self.retired {
            let notifier = Arc::clone(&self.notifier);
            let remote = self.remote;
            match run_blocking(move || notifier.notify_died(&remote)).await {
                Ok(fired) => debug!(remote = %remote, fired, "Peer vanished"),
                Err(e) => error!(remote = %remote, error = %e, "Death notification failed"),
            }
            // Anything the watchers did not reach
            self.close_all().await;
        }

        // A waiting lock task may still hold a sender; do not wait on it forever
        drop(self.callbacks);
        drop(self.outbound);
        let mut writer_task = self.writer_task;
        match timeout(WRITE_TIMEOUT, &mut writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Writer task ended abnormally"),
            Err(_) => {
                debug!(remote = %self.remote, "Writer still draining, aborting");
                writer_task.abort();
            }
        }
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        // Bound the read so a peer that never sends a newline cannot grow
        // the buffer past the cap
        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        trace!(
            client_id = ?self.client_id,
            message = ?msg.message,
            "Received message"
        );

        Ok(msg)
    }

    /// Queues a message for the writer task.
    fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        self.outbound
            .send(msg)
            .map_err(|_| ConnectionError::WriterClosed)
    }
}

/// Runs a blocking arbitrator call off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ConnectionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConnectionError::Internal(e.to_string()))
}

fn spawn_writer(
    writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<DaemonMessage>,
    connection_number: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                debug!(connection = connection_number, error = %e, "Write failed, stopping writer");
                break;
            }
        }
        let _ = writer.shutdown().await;
    })
}

async fn write_message(
    writer: &mut BufWriter<OwnedWriteHalf>,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Client said goodbye")]
    Goodbye,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Writer task is gone")]
    WriterClosed,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}
