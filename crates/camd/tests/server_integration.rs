//! Integration tests for the Unix socket server.
//!
//! These tests drive a real `DaemonServer` over a socket in a temp dir:
//! handshake, resource queries, opening handles, device events, and what
//! happens to held resources when a peer goes away.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camd::access::AccessPolicy;
use camd::arbiter::Arbitrator;
use camd::hal::SimulatedDriver;
use camd::remote::LocalDeathNotifier;
use camd::server::DaemonServer;
use camd::sound::FileSoundLoader;
use camd_core::{
    AccessMode, ClientId, DeathNotifier, DeviceCommand, DeviceEvent, DeviceReply, HardwareDriver,
    LockStatus, ResourceId, SoundLoader,
};
use camd_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound for any single reply
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const BACK: ResourceId = ResourceId::new(0);
const FRONT: ResourceId = ResourceId::new(1);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    arbiter: Arc<Arbitrator>,
    driver: Arc<SimulatedDriver>,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("camd.sock");

        let shutter = temp_dir.path().join("click.ogg");
        let recording = temp_dir.path().join("record.ogg");
        std::fs::write(&shutter, b"ogg").unwrap();
        std::fs::write(&recording, b"ogg").unwrap();

        let driver = Arc::new(SimulatedDriver::with_default_devices());
        let notifier = Arc::new(LocalDeathNotifier::new());
        let arbiter = Arbitrator::new(
            Arc::clone(&driver) as Arc<dyn HardwareDriver>,
            Arc::clone(&notifier) as Arc<dyn DeathNotifier>,
            Arc::new(FileSoundLoader::new(shutter, recording)) as Arc<dyn SoundLoader>,
            AccessPolicy::allow_all(),
        )
        .expect("build arbitrator");

        let weak = Arc::downgrade(&arbiter);
        driver
            .attach_event_sink(Arc::new(move |resource, event| {
                if let Some(arbiter) = weak.upgrade() {
                    arbiter.dispatch_device_event(resource, &event);
                }
            }))
            .expect("attach event sink");

        let cancel_token = CancellationToken::new();
        let server = DaemonServer::new(
            socket_path.clone(),
            Arc::clone(&arbiter),
            notifier,
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            cancel_token,
            arbiter,
            driver,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake.
    async fn client(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.handshake(Some(name.to_string())).await;
        client
    }

    /// Polls until `resource` is free or the deadline passes.
    async fn wait_until_free(&self, resource: ResourceId) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if !self.arbiter.is_busy(resource) {
                return true;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        false
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        self.driver.detach_event_sink();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    /// Events that arrived while waiting for a reply
    events: VecDeque<DaemonMessage>,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            events: VecDeque::new(),
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads the next line, or `None` on EOF.
    async fn recv_any(&mut self) -> Option<DaemonMessage> {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply within timeout")
            .unwrap();
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Receives the next reply, setting events aside.
    async fn recv(&mut self) -> DaemonMessage {
        loop {
            let msg = self.recv_any().await.expect("connection closed early");
            if msg.is_event() {
                self.events.push_back(msg);
            } else {
                return msg;
            }
        }
    }

    /// Receives the next event, including ones set aside earlier.
    async fn recv_event(&mut self) -> (ClientId, DeviceEvent) {
        let msg = match self.events.pop_front() {
            Some(msg) => msg,
            None => self.recv_any().await.expect("connection closed early"),
        };
        match msg {
            DaemonMessage::DeviceEvent { handle, event, .. } => (handle, event),
            other => panic!("Expected DeviceEvent, got {other:?}"),
        }
    }

    async fn handshake(&mut self, client_id: Option<String>) -> String {
        self.send(ClientMessage::connect(client_id)).await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    async fn open(&mut self, resource: ResourceId, mode: AccessMode) -> ClientId {
        self.send(ClientMessage::open(resource, mode)).await;
        match self.recv().await {
            DaemonMessage::Opened { handle, .. } => handle,
            other => panic!("Expected Opened, got {other:?}"),
        }
    }

    /// Sends a request expected to fail and returns the error code.
    async fn expect_error(&mut self, msg: ClientMessage) -> String {
        self.send(msg).await;
        match self.recv().await {
            DaemonMessage::Error { code, .. } => code.unwrap_or_default(),
            other => panic!("Expected Error, got {other:?}"),
        }
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_success() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage::connect(Some("camera-app".to_string())))
        .await;

    match client.recv().await {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert_eq!(client_id, "camera-app");
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_auto_assigns_client_id() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let client_id = client.handshake(None).await;
    assert!(client_id.starts_with("client-"), "got: {client_id}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect { client_id: None },
        })
        .await;

    match client.recv().await {
        DaemonMessage::Rejected { reason, .. } => {
            assert!(reason.contains("Incompatible"), "got: {reason}");
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Query Tests
// ============================================================================

#[tokio::test]
async fn test_list_and_describe_resources() {
    let server = TestServer::spawn().await;
    let mut client = server.client("lister").await;

    client.send(ClientMessage::list_resources()).await;
    match client.recv().await {
        DaemonMessage::ResourceList { resources } => {
            assert_eq!(resources.len(), 2);
            assert_eq!(resources.first().map(|r| r.id), Some(BACK));
            assert_eq!(resources.get(1).map(|r| r.orientation), Some(270));
        }
        other => panic!("Expected ResourceList, got {other:?}"),
    }

    client.send(ClientMessage::describe_resource(FRONT)).await;
    match client.recv().await {
        DaemonMessage::Resource { resource } => assert_eq!(resource.id, FRONT),
        other => panic!("Expected Resource, got {other:?}"),
    }

    let code = client
        .expect_error(ClientMessage::describe_resource(ResourceId::new(7)))
        .await;
    assert_eq!(code, "invalid_id");

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_line_does_not_drop_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.client("sloppy").await;

    client.send_raw("{not json").await;
    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("parse_error")),
        other => panic!("Expected Error, got {other:?}"),
    }

    client.send(ClientMessage::ping(7)).await;
    match client.recv().await {
        DaemonMessage::Pong { seq } => assert_eq!(seq, 7),
        other => panic!("Expected Pong, got {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Exclusive Access Tests
// ============================================================================

#[tokio::test]
async fn test_second_exclusive_open_is_busy() {
    let server = TestServer::spawn().await;
    let mut first = server.client("first").await;
    let mut second = server.client("second").await;

    first.open(BACK, AccessMode::Exclusive).await;

    let code = second
        .expect_error(ClientMessage::open(BACK, AccessMode::Exclusive))
        .await;
    assert_eq!(code, "already_busy");

    // The other camera is still free
    second.open(FRONT, AccessMode::Exclusive).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_frees_resource() {
    let server = TestServer::spawn().await;
    let mut first = server.client("first").await;
    let mut second = server.client("second").await;

    let handle = first.open(BACK, AccessMode::Exclusive).await;
    first.send(ClientMessage::close(handle)).await;
    match first.recv().await {
        DaemonMessage::Closed { handle: closed } => assert_eq!(closed, handle),
        other => panic!("Expected Closed, got {other:?}"),
    }

    second.open(BACK, AccessMode::Exclusive).await;

    let code = first.expect_error(ClientMessage::close(handle)).await;
    assert_eq!(code, "unknown_handle");

    server.shutdown().await;
}

#[tokio::test]
async fn test_dropped_socket_frees_resource() {
    let server = TestServer::spawn().await;

    let mut doomed = server.client("doomed").await;
    doomed.open(BACK, AccessMode::Exclusive).await;
    assert!(server.arbiter.is_busy(BACK));

    drop(doomed);

    assert!(
        server.wait_until_free(BACK).await,
        "Resource still held after its peer vanished"
    );

    let mut next = server.client("next").await;
    next.open(BACK, AccessMode::Exclusive).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_without_newline_drops_connection() {
    let server = TestServer::spawn().await;

    let mut flooder = server.client("flooder").await;
    flooder.open(BACK, AccessMode::Exclusive).await;
    assert!(server.arbiter.is_busy(BACK));

    // Twice the cap, never terminated; the daemon hangs up partway through
    let payload = vec![b'a'; 2 * 1_048_576];
    let _ = timeout(RECV_TIMEOUT, flooder.writer.write_all(&payload)).await;

    assert!(
        server.wait_until_free(BACK).await,
        "Resource still held while the peer streams an unterminated line"
    );

    let mut next = server.client("next").await;
    next.open(BACK, AccessMode::Exclusive).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_closes_every_handle() {
    let server = TestServer::spawn().await;
    let mut client = server.client("tidy").await;

    client.open(BACK, AccessMode::Exclusive).await;
    client.open(FRONT, AccessMode::Shared).await;
    assert_eq!(server.arbiter.client_count(), 2);

    client.send(ClientMessage::disconnect()).await;
    assert!(client.recv_any().await.is_none(), "Expected EOF after disconnect");

    assert!(!server.arbiter.is_busy(BACK));
    assert_eq!(server.arbiter.client_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_control_and_shutter_event() {
    let server = TestServer::spawn().await;
    let mut client = server.client("shooter").await;

    let handle = client.open(BACK, AccessMode::Exclusive).await;

    client
        .send(ClientMessage::control(handle, DeviceCommand::GetParameters))
        .await;
    match client.recv().await {
        DaemonMessage::ControlResult { handle: h, reply } => {
            assert_eq!(h, handle);
            assert!(matches!(reply, DeviceReply::Parameters { .. }));
        }
        other => panic!("Expected ControlResult, got {other:?}"),
    }

    client
        .send(ClientMessage::control(handle, DeviceCommand::TakePicture))
        .await;
    match client.recv().await {
        DaemonMessage::ControlResult { reply, .. } => assert_eq!(reply, DeviceReply::Done),
        other => panic!("Expected ControlResult, got {other:?}"),
    }

    let (event_handle, event) = client.recv_event().await;
    assert_eq!(event_handle, handle);
    assert_eq!(event, DeviceEvent::Shutter);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shared_command_on_exclusive_handle() {
    let server = TestServer::spawn().await;
    let mut client = server.client("confused").await;

    let handle = client.open(BACK, AccessMode::Exclusive).await;

    let code = client
        .expect_error(ClientMessage::control(
            handle,
            DeviceCommand::CancelStream { stream_id: 1 },
        ))
        .await;
    assert_eq!(code, "unsupported_command");

    let code = client
        .expect_error(ClientMessage::exclusive_lock(handle, false))
        .await;
    assert_eq!(code, "unsupported_command");

    server.shutdown().await;
}

// ============================================================================
// Shared Access Tests
// ============================================================================

#[tokio::test]
async fn test_shared_lock_blocks_exclusive_open() {
    let server = TestServer::spawn().await;
    let mut shared = server.client("shared").await;
    let mut exclusive = server.client("exclusive").await;

    let handle = shared.open(BACK, AccessMode::Shared).await;

    shared
        .send(ClientMessage::exclusive_lock(handle, false))
        .await;
    match shared.recv().await {
        DaemonMessage::LockResult { held, .. } => assert!(held),
        other => panic!("Expected LockResult, got {other:?}"),
    }
    let (_, event) = shared.recv_event().await;
    assert_eq!(
        event,
        DeviceEvent::LockStatus {
            status: LockStatus::Acquired
        }
    );

    let code = exclusive
        .expect_error(ClientMessage::open(BACK, AccessMode::Exclusive))
        .await;
    assert_eq!(code, "already_busy");

    shared.send(ClientMessage::exclusive_unlock(handle)).await;
    match shared.recv().await {
        DaemonMessage::LockResult { held, .. } => assert!(!held),
        other => panic!("Expected LockResult, got {other:?}"),
    }

    exclusive.open(BACK, AccessMode::Exclusive).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_waiting_lock_granted_when_holder_leaves() {
    let server = TestServer::spawn().await;
    let mut holder = server.client("holder").await;
    let mut waiter = server.client("waiter").await;

    let held = holder.open(BACK, AccessMode::Shared).await;
    let waiting = waiter.open(BACK, AccessMode::Shared).await;

    holder.send(ClientMessage::exclusive_lock(held, false)).await;
    assert!(matches!(
        holder.recv().await,
        DaemonMessage::LockResult { held: true, .. }
    ));

    waiter.send(ClientMessage::exclusive_lock(waiting, true)).await;

    // The waiting request does not stall the connection
    waiter.send(ClientMessage::ping(1)).await;
    assert!(matches!(waiter.recv().await, DaemonMessage::Pong { seq: 1 }));

    holder.send(ClientMessage::disconnect()).await;

    match waiter.recv().await {
        DaemonMessage::LockResult { handle, held } => {
            assert_eq!(handle, waiting);
            assert!(held);
        }
        other => panic!("Expected LockResult, got {other:?}"),
    }

    waiter.send(ClientMessage::has_exclusive_lock(waiting)).await;
    assert!(matches!(
        waiter.recv().await,
        DaemonMessage::LockResult { held: true, .. }
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_dump_state_over_socket() {
    let server = TestServer::spawn().await;
    let mut client = server.client("inspector").await;

    let handle = client.open(FRONT, AccessMode::Exclusive).await;

    client.send(ClientMessage::dump_state()).await;
    match client.recv().await {
        DaemonMessage::StateDump { text } => {
            assert!(text.contains("camd arbitration state"));
            assert!(text.contains(&format!("exclusive: {handle}")));
        }
        other => panic!("Expected StateDump, got {other:?}"),
    }

    server.shutdown().await;
}
