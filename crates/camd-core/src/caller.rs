//! Caller identities and connection handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::remote::ClientCallbacks;

/// Identifier of one client connection (exclusive or shared).
///
/// Ids are allocated monotonically by the arbitrator and never reused, so a
/// stale id can never alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identity of a caller's callback channel.
///
/// Two handles compare equal iff they name the same remote peer. The value
/// carries no lifetime: whether the peer is still alive is only known to the
/// [`DeathNotifier`](crate::DeathNotifier) that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(u64);

impl RemoteHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote-{}", self.0)
    }
}

/// Process credentials of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub pid: u32,
    pub uid: u32,
}

impl CallerIdentity {
    pub fn new(pid: u32, uid: u32) -> Self {
        Self { pid, uid }
    }

    /// Identity of the current process.
    pub fn current_process(uid: u32) -> Self {
        Self::new(std::process::id(), uid)
    }
}

/// Everything the arbitrator needs to know about a connecting caller.
#[derive(Clone)]
pub struct CallerRef {
    pub identity: CallerIdentity,
    pub remote: RemoteHandle,
    /// Channel used to deliver device and lock events back to the caller.
    pub callbacks: Arc<dyn ClientCallbacks>,
}

impl CallerRef {
    pub fn new(
        identity: CallerIdentity,
        remote: RemoteHandle,
        callbacks: Arc<dyn ClientCallbacks>,
    ) -> Self {
        Self {
            identity,
            remote,
            callbacks,
        }
    }
}

impl fmt::Debug for CallerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerRef")
            .field("identity", &self.identity)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display() {
        assert_eq!(ClientId::new(12).to_string(), "#12");
        assert_eq!(RemoteHandle::new(4).to_string(), "remote-4");
    }

    #[test]
    fn test_remote_equality() {
        assert_eq!(RemoteHandle::new(1), RemoteHandle::new(1));
        assert_ne!(RemoteHandle::new(1), RemoteHandle::new(2));
    }

    #[test]
    fn test_client_id_serde_transparent() {
        let json = serde_json::to_string(&ClientId::new(5)).unwrap();
        assert_eq!(json, "5");
        let id: ClientId = serde_json::from_str("9").unwrap();
        assert_eq!(id, ClientId::new(9));
    }
}
