//! Integration tests for `ControlClient` against a scripted daemon.
//!
//! The fake daemon reads one line per scripted reply and answers with the
//! scripted messages, which lets the tests interleave events with replies.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::time::Duration;

use camctl::{ControlClient, CtlError};
use camd_core::{AccessMode, ClientId, DeviceEvent, Facing, ResourceId, ResourceInfo};
use camd_protocol::{ClientMessage, DaemonMessage, MessageType};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

// ============================================================================
// Test Helpers
// ============================================================================

/// Replies sent for each request, in order.
type Script = Vec<Vec<DaemonMessage>>;

/// Spawns a daemon that answers each incoming line with the next batch.
/// Returns the requests it saw.
fn spawn_fake_daemon(dir: &TempDir, script: Script) -> (PathBuf, JoinHandle<Vec<MessageType>>) {
    let path = dir.path().join("fake.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut seen = Vec::new();

        for batch in script {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let msg: ClientMessage = serde_json::from_str(&line).unwrap();
            seen.push(msg.message);

            for reply in batch {
                let json = serde_json::to_string(&reply).unwrap();
                writer.write_all(json.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
            writer.flush().await.unwrap();
        }
        seen
    });

    (path, task)
}

fn connected() -> Vec<DaemonMessage> {
    vec![DaemonMessage::connected("tester".to_string())]
}

fn shutter_event(handle: u64) -> DaemonMessage {
    DaemonMessage::device_event(ClientId::new(handle), ResourceId::new(0), DeviceEvent::Shutter)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let resources = vec![
        ResourceInfo::new(ResourceId::new(0), Facing::Back, 90),
        ResourceInfo::new(ResourceId::new(1), Facing::Front, 270),
    ];
    let (path, daemon) = spawn_fake_daemon(
        &dir,
        vec![connected(), vec![DaemonMessage::resource_list(resources.clone())]],
    );

    let mut client = ControlClient::connect(&path, Some("tester".to_string()))
        .await
        .unwrap();
    assert_eq!(client.client_id(), "tester");
    assert_eq!(client.list_resources().await.unwrap(), resources);

    let seen = daemon.await.unwrap();
    assert!(matches!(seen.first(), Some(MessageType::Connect { .. })));
    assert!(matches!(seen.get(1), Some(MessageType::ListResources)));
}

#[tokio::test]
async fn test_rejected_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _daemon) = spawn_fake_daemon(
        &dir,
        vec![vec![DaemonMessage::rejected("Incompatible version")]],
    );

    match ControlClient::connect(&path, None).await {
        Err(CtlError::Rejected(reason)) => assert!(reason.contains("Incompatible")),
        Err(other) => panic!("Expected Rejected, got {other:?}"),
        Ok(_) => panic!("Expected rejection"),
    }
}

#[tokio::test]
async fn test_events_before_reply_are_set_aside() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _daemon) = spawn_fake_daemon(
        &dir,
        vec![
            connected(),
            vec![
                shutter_event(4),
                DaemonMessage::opened(ClientId::new(5), ResourceId::new(0), AccessMode::Shared),
            ],
        ],
    );

    let mut client = ControlClient::connect(&path, None).await.unwrap();
    let handle = client
        .open(ResourceId::new(0), AccessMode::Shared)
        .await
        .unwrap();
    assert_eq!(handle, ClientId::new(5));

    let event = client
        .next_event(Duration::from_millis(10))
        .await
        .unwrap()
        .expect("buffered event");
    assert_eq!(event.handle, ClientId::new(4));
    assert_eq!(event.event, DeviceEvent::Shutter);
}

#[tokio::test]
async fn test_daemon_error_carries_code() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _daemon) = spawn_fake_daemon(
        &dir,
        vec![
            connected(),
            vec![DaemonMessage::error_with_code("resource 0 is busy", "already_busy")],
        ],
    );

    let mut client = ControlClient::connect(&path, None).await.unwrap();
    let err = client
        .open(ResourceId::new(0), AccessMode::Exclusive)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("already_busy"));
}

#[tokio::test]
async fn test_next_event_times_out_quietly() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _daemon) = spawn_fake_daemon(&dir, vec![connected(), vec![]]);

    let mut client = ControlClient::connect(&path, None).await.unwrap();
    let event = client.next_event(Duration::from_millis(20)).await.unwrap();
    assert!(event.is_none());
}
