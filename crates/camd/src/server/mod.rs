//! Unix socket server for the camd daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Gives every connection its own remote handle and caller identity
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept() + peer_cred()
//!         ▼
//! ┌─────────────────┐  spawn_blocking  ┌─────────────────┐
//! │ConnectionHandler│─────────────────▶│   Arbitrator    │
//! │ (one remote)    │                  │                 │
//! └───────┬─────────┘                  └────────┬────────┘
//!         │ mpsc                                │ device events
//!         ▼                                     │
//! ┌─────────────────┐                           │
//! │  writer task    │◀──────────────────────────┘
//! └─────────────────┘
//! ```
//!
//! A socket that closes without a `disconnect` message is treated as a
//! dead remote: its death notification fires and every handle it opened is
//! torn down through the same path as an explicit close.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use camd_core::CallerIdentity;

use crate::arbiter::Arbitrator;
use crate::remote::LocalDeathNotifier;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/camd.sock";

/// Unix socket server for the camd daemon.
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    arbiter: Arc<Arbitrator>,

    /// Issues one remote per connection and fires its death notification
    notifier: Arc<LocalDeathNotifier>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl DaemonServer {
    /// Creates a new daemon server.
    ///
    /// `notifier` must be the same notifier the arbitrator was built with,
    /// otherwise socket drops never reach the arbitrator's death watchers.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        arbiter: Arc<Arbitrator>,
        notifier: Arc<LocalDeathNotifier>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            arbiter,
            notifier,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        info!(
            socket = %self.socket_path.display(),
            resources = self.arbiter.resource_count(),
            "Daemon server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        // Remove a stale socket left behind by a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    /// Spawns a handler task for a freshly accepted connection.
    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let identity = match stream.peer_cred() {
            Ok(cred) => CallerIdentity::new(
                cred.pid().and_then(|pid| u32::try_from(pid).ok()).unwrap_or(0),
                cred.uid(),
            ),
            Err(e) => {
                warn!(
                    connection = connection_number,
                    error = %e,
                    "Could not read peer credentials, dropping connection"
                );
                return;
            }
        };

        let remote = self.notifier.new_remote();
        debug!(
            connection = connection_number,
            remote = %remote,
            pid = identity.pid,
            uid = identity.uid,
            "Accepted connection"
        );

        let handler = ConnectionHandler::new(
            stream,
            Arc::clone(&self.arbiter),
            Arc::clone(&self.notifier),
            identity,
            remote,
            connection_number,
        );
        tokio::spawn(handler.run());
    }

    /// Removes the socket file.
    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
