//! Remote peers and their death notifications.
//!
//! In the daemon one socket connection is one remote peer.
//! [`LocalDeathNotifier`] hands out a [`RemoteHandle`] per connection and
//! fires every subscription on that handle when the connection drops
//! without an explicit goodbye.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use camd_core::{DeathError, DeathNotifier, DeathRecipient, RemoteHandle, SubscriptionId};

type Subscriptions = HashMap<SubscriptionId, Arc<dyn DeathRecipient>>;

/// Death notifier for in-process remotes.
#[derive(Default)]
pub struct LocalDeathNotifier {
    live: Mutex<HashMap<RemoteHandle, Subscriptions>>,
    next_remote: AtomicU64,
    next_subscription: AtomicU64,
}

impl LocalDeathNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, live remote.
    pub fn new_remote(&self) -> RemoteHandle {
        let remote = RemoteHandle::new(self.next_remote.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.lock().insert(remote, HashMap::new());
        debug!(remote = %remote, "Remote allocated");
        remote
    }

    pub fn is_alive(&self, remote: &RemoteHandle) -> bool {
        self.live.lock().contains_key(remote)
    }

    pub fn subscription_count(&self, remote: &RemoteHandle) -> usize {
        self.live.lock().get(remote).map(HashMap::len).unwrap_or(0)
    }

    /// Marks `remote` dead and fires its subscriptions, outside the lock.
    /// Returns how many recipients were notified.
    pub fn notify_died(&self, remote: &RemoteHandle) -> usize {
        let recipients = self.live.lock().remove(remote);
        let Some(recipients) = recipients else {
            return 0;
        };

        info!(remote = %remote, subscriptions = recipients.len(), "Remote died");
        for recipient in recipients.values() {
            recipient.remote_died(remote);
        }
        recipients.len()
    }

    /// Marks `remote` gone without notifying anyone. Used after an orderly
    /// goodbye, once every client of the remote has been disconnected.
    pub fn retire(&self, remote: &RemoteHandle) {
        if let Some(leftover) = self.live.lock().remove(remote) {
            debug!(remote = %remote, leftover = leftover.len(), "Remote retired");
        }
    }
}

impl DeathNotifier for LocalDeathNotifier {
    fn subscribe(
        &self,
        remote: &RemoteHandle,
        recipient: Arc<dyn DeathRecipient>,
    ) -> Result<SubscriptionId, DeathError> {
        let mut live = self.live.lock();
        let subscriptions = live.get_mut(remote).ok_or(DeathError::RemoteDead(*remote))?;
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        subscriptions.insert(id, recipient);
        Ok(id)
    }

    fn unsubscribe(&self, remote: &RemoteHandle, subscription: SubscriptionId) {
        if let Some(subscriptions) = self.live.lock().get_mut(remote) {
            subscriptions.remove(&subscription);
        }
    }
}

impl std::fmt::Debug for LocalDeathNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDeathNotifier")
            .field("live_remotes", &self.live.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DeathRecipient for Counter {
        fn remote_died(&self, _remote: &RemoteHandle) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_remotes_are_distinct_and_live() {
        let notifier = LocalDeathNotifier::new();
        let a = notifier.new_remote();
        let b = notifier.new_remote();
        assert_ne!(a, b);
        assert!(notifier.is_alive(&a));
        assert!(!notifier.is_alive(&RemoteHandle::new(99)));
    }

    #[test]
    fn test_notify_fires_once() {
        let notifier = LocalDeathNotifier::new();
        let remote = notifier.new_remote();
        let counter = Arc::new(Counter::default());
        notifier
            .subscribe(&remote, Arc::clone(&counter) as Arc<dyn DeathRecipient>)
            .unwrap();

        assert_eq!(notifier.notify_died(&remote), 1);
        assert_eq!(notifier.notify_died(&remote), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!notifier.is_alive(&remote));
    }

    #[test]
    fn test_subscribe_to_dead_remote() {
        let notifier = LocalDeathNotifier::new();
        let remote = notifier.new_remote();
        notifier.retire(&remote);

        let result = notifier.subscribe(&remote, Arc::new(Counter::default()));
        assert_eq!(result.unwrap_err(), DeathError::RemoteDead(remote));
    }

    #[test]
    fn test_unsubscribe_prevents_notification() {
        let notifier = LocalDeathNotifier::new();
        let remote = notifier.new_remote();
        let counter = Arc::new(Counter::default());
        let sub = notifier
            .subscribe(&remote, Arc::clone(&counter) as Arc<dyn DeathRecipient>)
            .unwrap();

        notifier.unsubscribe(&remote, sub);
        assert_eq!(notifier.subscription_count(&remote), 0);
        notifier.notify_died(&remote);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
