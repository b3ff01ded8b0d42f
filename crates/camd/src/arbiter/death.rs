//! Remote death watching.
//!
//! Every live client registers one [`DeathWatcher`] on its caller's remote
//! handle. When the remote dies the watcher routes into the same
//! disconnect path as an explicit teardown. The fired flag makes sure that
//! happens at most once, whichever of the notifier and the explicit path
//! gets there first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use camd_core::{ClientId, DeathError, DeathNotifier, DeathRecipient, RemoteHandle, SubscriptionId};

use super::Arbitrator;

/// Death recipient bound to one client.
pub struct DeathWatcher {
    client: ClientId,
    arbiter: Weak<Arbitrator>,
    fired: AtomicBool,
}

impl DeathWatcher {
    /// Subscribes a new watcher for `client` on `remote`.
    ///
    /// # Errors
    ///
    /// - `DeathError::RemoteDead` if the remote is already gone; nothing is
    ///   left subscribed in that case
    pub fn watch(
        notifier: &dyn DeathNotifier,
        remote: RemoteHandle,
        client: ClientId,
        arbiter: Weak<Arbitrator>,
    ) -> Result<DeathWatch, DeathError> {
        let watcher = Arc::new(Self {
            client,
            arbiter,
            fired: AtomicBool::new(false),
        });
        let recipient: Arc<dyn DeathRecipient> = Arc::clone(&watcher) as Arc<dyn DeathRecipient>;
        let subscription = notifier.subscribe(&remote, recipient)?;
        debug!(client = %client, remote = %remote, subscription = %subscription, "Death watch registered");

        Ok(DeathWatch {
            watcher,
            remote,
            subscription,
        })
    }

    /// Returns true if the watcher has fired or was cancelled.
    pub fn is_spent(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl DeathRecipient for DeathWatcher {
    fn remote_died(&self, remote: &RemoteHandle) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(arbiter) = self.arbiter.upgrade() else {
            debug!(client = %self.client, "Remote died after arbitrator shutdown");
            return;
        };

        info!(client = %self.client, remote = %remote, "Remote died, disconnecting client");
        if !arbiter.disconnect_client(self.client) {
            warn!(client = %self.client, "Dead remote's client was already gone");
        }
    }
}

/// An active subscription, owned by the client it watches.
pub struct DeathWatch {
    watcher: Arc<DeathWatcher>,
    remote: RemoteHandle,
    subscription: SubscriptionId,
}

impl DeathWatch {
    /// Disarms the watcher and drops the subscription.
    pub fn cancel(self, notifier: &dyn DeathNotifier) {
        self.watcher.fired.store(true, Ordering::Release);
        notifier.unsubscribe(&self.remote, self.subscription);
    }

    pub fn remote(&self) -> RemoteHandle {
        self.remote
    }
}

impl std::fmt::Debug for DeathWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeathWatch")
            .field("client", &self.watcher.client)
            .field("remote", &self.remote)
            .field("subscription", &self.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingNotifier {
        next: Mutex<u64>,
        subs: Mutex<HashMap<u64, Arc<dyn DeathRecipient>>>,
        dead: Mutex<Vec<RemoteHandle>>,
    }

    impl DeathNotifier for RecordingNotifier {
        fn subscribe(
            &self,
            remote: &RemoteHandle,
            recipient: Arc<dyn DeathRecipient>,
        ) -> Result<SubscriptionId, DeathError> {
            if self.dead.lock().contains(remote) {
                return Err(DeathError::RemoteDead(*remote));
            }
            let mut next = self.next.lock();
            *next += 1;
            self.subs.lock().insert(*next, recipient);
            Ok(SubscriptionId::new(*next))
        }

        fn unsubscribe(&self, _remote: &RemoteHandle, subscription: SubscriptionId) {
            self.subs.lock().retain(|id, _| SubscriptionId::new(*id) != subscription);
        }
    }

    #[test]
    fn test_watch_on_dead_remote_fails() {
        let notifier = RecordingNotifier::default();
        notifier.dead.lock().push(RemoteHandle::new(1));

        let result = DeathWatcher::watch(&notifier, RemoteHandle::new(1), ClientId::new(1), Weak::new());
        assert!(matches!(result, Err(DeathError::RemoteDead(_))));
        assert!(notifier.subs.lock().is_empty());
    }

    #[test]
    fn test_cancel_unsubscribes_and_disarms() {
        let notifier = RecordingNotifier::default();
        let watch =
            DeathWatcher::watch(&notifier, RemoteHandle::new(2), ClientId::new(5), Weak::new()).unwrap();
        let watcher = Arc::clone(&watch.watcher);
        assert_eq!(notifier.subs.lock().len(), 1);

        watch.cancel(&notifier);
        assert!(notifier.subs.lock().is_empty());
        assert!(watcher.is_spent());
    }

    #[test]
    fn test_fires_once_without_arbitrator() {
        let notifier = RecordingNotifier::default();
        let watch =
            DeathWatcher::watch(&notifier, RemoteHandle::new(3), ClientId::new(6), Weak::new()).unwrap();

        watch.watcher.remote_died(&RemoteHandle::new(3));
        assert!(watch.watcher.is_spent());
        // Second notification is ignored
        watch.watcher.remote_died(&RemoteHandle::new(3));
    }
}
