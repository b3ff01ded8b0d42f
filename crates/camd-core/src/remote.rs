//! Remote peer contracts: death notification and callback delivery.

use std::fmt;
use std::sync::Arc;

use crate::caller::{ClientId, RemoteHandle};
use crate::error::DeathError;
use crate::hal::DeviceEvent;
use crate::resource::ResourceId;

/// Token returned by [`DeathNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiver of "remote terminated" notifications.
pub trait DeathRecipient: Send + Sync {
    /// Called at most once per subscription, from the notifier's thread.
    fn remote_died(&self, remote: &RemoteHandle);
}

/// Source of "remote terminated" notifications.
pub trait DeathNotifier: Send + Sync {
    /// Subscribes `recipient` to the death of `remote`.
    ///
    /// # Errors
    ///
    /// - `DeathError::RemoteDead` if the remote has already terminated
    fn subscribe(
        &self,
        remote: &RemoteHandle,
        recipient: Arc<dyn DeathRecipient>,
    ) -> Result<SubscriptionId, DeathError>;

    /// Cancels a subscription. Unknown subscriptions are ignored.
    fn unsubscribe(&self, remote: &RemoteHandle, subscription: SubscriptionId);
}

/// A caller's callback channel.
///
/// Implementations must not block for long: events are delivered while the
/// arbitrator holds the per-resource slot lock.
pub trait ClientCallbacks: Send + Sync {
    /// `client` names the connection the event is for, so one channel can
    /// serve several connections of the same caller.
    fn on_device_event(&self, client: ClientId, resource: ResourceId, event: &DeviceEvent);
}

/// Callback channel that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl ClientCallbacks for NoopCallbacks {
    fn on_device_event(&self, _client: ClientId, _resource: ResourceId, _event: &DeviceEvent) {}
}
