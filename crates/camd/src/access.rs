//! Caller admission.
//!
//! Callers from the daemon's own process are always admitted. Everyone else
//! is checked against the configured uid allowlist; an empty list admits
//! every uid.

use camd_core::{ArbiterError, ArbiterResult, CallerIdentity};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    service_pid: u32,
    allowed_uids: Vec<u32>,
}

impl AccessPolicy {
    /// Admits every caller.
    pub fn allow_all() -> Self {
        Self::with_allowed_uids(Vec::new())
    }

    pub fn with_allowed_uids(allowed_uids: Vec<u32>) -> Self {
        Self {
            service_pid: std::process::id(),
            allowed_uids,
        }
    }

    /// # Errors
    ///
    /// - `ArbiterError::PermissionDenied` if the caller is neither this
    ///   process nor an allowed uid
    pub fn check(&self, caller: &CallerIdentity) -> ArbiterResult<()> {
        if caller.pid == self.service_pid
            || self.allowed_uids.is_empty()
            || self.allowed_uids.contains(&caller.uid)
        {
            return Ok(());
        }

        warn!(pid = caller.pid, uid = caller.uid, "Rejected caller");
        Err(ArbiterError::PermissionDenied {
            pid: caller.pid,
            uid: caller.uid,
        })
    }

    pub fn allowed_uids(&self) -> &[u32] {
        &self.allowed_uids
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}
