//! Shared-client bookkeeping and the advisory exclusive lock.
//!
//! Any number of shared clients may be connected to a resource at once.
//! Among them, at most one may hold the resource's exclusive lock. The lock
//! also respects exclusive ownership: while an exclusive client owns the
//! slot no shared client can take the lock, and while a shared client holds
//! the lock no exclusive client can connect.

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use camd_core::{ArbiterError, ArbiterResult, ClientId, ResourceId};

// ============================================================================
// Registry
// ============================================================================

/// Per-resource lists of shared client ids.
///
/// Entries are non-owning. A client that died without deregistering stays
/// listed until the next traversal through [`SharedClientRegistry::live`]
/// drops it.
#[derive(Debug, Clone, Default)]
pub struct SharedClientRegistry {
    holders: Vec<Vec<ClientId>>,
}

impl SharedClientRegistry {
    pub fn new(resource_count: usize) -> Self {
        Self {
            holders: vec![Vec::new(); resource_count],
        }
    }

    /// Appends `client` to the resource's list.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::InvalidId` if the id is outside the registry
    pub fn register(&mut self, resource: ResourceId, client: ClientId) -> ArbiterResult<()> {
        let count = self.holders.len();
        let list = self
            .holders
            .get_mut(resource.index())
            .ok_or(ArbiterError::InvalidId { resource, count })?;
        if !list.contains(&client) {
            list.push(client);
        }
        Ok(())
    }

    /// Removes `client`. Returns true if it was listed.
    pub fn unregister(&mut self, resource: ResourceId, client: ClientId) -> bool {
        match self.holders.get_mut(resource.index()) {
            Some(list) => {
                let before = list.len();
                list.retain(|c| *c != client);
                list.len() != before
            }
            None => false,
        }
    }

    /// Listed ids for a resource, including ones not yet pruned.
    pub fn listed(&self, resource: ResourceId) -> &[ClientId] {
        self.holders
            .get(resource.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the live ids for a resource, pruning dead entries on the way.
    pub fn live(&mut self, resource: ResourceId, is_live: impl Fn(ClientId) -> bool) -> Vec<ClientId> {
        let Some(list) = self.holders.get_mut(resource.index()) else {
            return Vec::new();
        };
        let before = list.len();
        list.retain(|c| is_live(*c));
        if list.len() != before {
            debug!(
                resource = %resource,
                pruned = before - list.len(),
                "Pruned dead shared clients"
            );
        }
        list.clone()
    }

    /// Total number of listed shared clients across all resources.
    pub fn total(&self) -> usize {
        self.holders.iter().map(Vec::len).sum()
    }
}

// ============================================================================
// Exclusive Lock
// ============================================================================

#[derive(Debug, Default)]
struct LockState {
    holder: Option<ClientId>,
    /// Mirrors the table's busy flag so lock decisions never need the
    /// global lock. Updated only while the global lock is held.
    owner_present: bool,
}

/// The per-resource exclusive lock shared clients negotiate over.
///
/// Guarded by its own mutex, which is a leaf in the lock hierarchy: nothing
/// else is acquired while it is held, and waiters block only on it.
#[derive(Debug)]
pub struct ExclusiveLock {
    resource: ResourceId,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl ExclusiveLock {
    pub fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    /// Takes the lock without waiting.
    ///
    /// Re-locking by the current holder succeeds.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::AlreadyLocked` if another client holds the lock or an
    ///   exclusive client owns the resource
    pub fn try_lock(&self, client: ClientId) -> ArbiterResult<()> {
        let mut state = self.state.lock();
        Self::take(&mut state, client).ok_or(ArbiterError::AlreadyLocked {
            resource: self.resource,
        })
    }

    /// Takes the lock, waiting until it becomes available.
    ///
    /// `is_alive` is rechecked on every wakeup; the wait ends with
    /// `Disconnected` once it returns false.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` if the waiting client is torn down
    pub fn lock(&self, client: ClientId, is_alive: impl Fn() -> bool) -> ArbiterResult<()> {
        let mut state = self.state.lock();
        loop {
            if !is_alive() {
                return Err(ArbiterError::Disconnected { client });
            }
            if Self::take(&mut state, client).is_some() {
                return Ok(());
            }
            trace!(resource = %self.resource, client = %client, "Waiting for exclusive lock");
            self.changed.wait(&mut state);
        }
    }

    fn take(state: &mut LockState, client: ClientId) -> Option<()> {
        match state.holder {
            Some(holder) if holder == client => Some(()),
            Some(_) => None,
            None if state.owner_present => None,
            None => {
                state.holder = Some(client);
                Some(())
            }
        }
    }

    /// Releases the lock held by `client`.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::NotHolder` if `client` is not the holder; the holder
    ///   is left unchanged
    pub fn unlock(&self, client: ClientId) -> ArbiterResult<()> {
        let mut state = self.state.lock();
        if state.holder != Some(client) {
            return Err(ArbiterError::NotHolder {
                client,
                resource: self.resource,
            });
        }
        state.holder = None;
        self.changed.notify_all();
        Ok(())
    }

    /// Point-in-time check; the answer may be stale as soon as it returns.
    pub fn is_held_by(&self, client: ClientId) -> bool {
        self.state.lock().holder == Some(client)
    }

    pub fn holder(&self) -> Option<ClientId> {
        self.state.lock().holder
    }

    /// Drops the lock if `client` holds it and wakes every waiter.
    ///
    /// Called during a shared client's teardown. Returns true if the client
    /// was the holder.
    pub fn forfeit(&self, client: ClientId) -> bool {
        let mut state = self.state.lock();
        let was_holder = state.holder == Some(client);
        if was_holder {
            state.holder = None;
        }
        self.changed.notify_all();
        was_holder
    }

    /// Marks the resource as exclusively owned, unless a shared client
    /// holds the lock. Returns false when the lock is held.
    ///
    /// Must be called with the arbitrator's global lock held, right before
    /// the table slot is acquired.
    pub fn claim_for_owner(&self) -> bool {
        let mut state = self.state.lock();
        if state.holder.is_some() {
            return false;
        }
        state.owner_present = true;
        true
    }

    /// Clears the exclusive-owner mark and wakes every waiter.
    pub fn release_owner(&self) {
        let mut state = self.state.lock();
        state.owner_present = false;
        self.changed.notify_all();
    }

    pub fn owner_present(&self) -> bool {
        self.state.lock().owner_present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const R0: ResourceId = ResourceId::new(0);

    #[test]
    fn test_registry_register_and_unregister() {
        let mut registry = SharedClientRegistry::new(2);
        registry.register(R0, ClientId::new(1)).unwrap();
        registry.register(R0, ClientId::new(2)).unwrap();
        registry.register(R0, ClientId::new(2)).unwrap();
        assert_eq!(registry.listed(R0), &[ClientId::new(1), ClientId::new(2)]);

        assert!(registry.unregister(R0, ClientId::new(1)));
        assert!(!registry.unregister(R0, ClientId::new(1)));
        assert_eq!(registry.total(), 1);

        assert!(registry
            .register(ResourceId::new(3), ClientId::new(9))
            .is_err());
    }

    #[test]
    fn test_registry_prunes_dead_on_traversal() {
        let mut registry = SharedClientRegistry::new(1);
        for id in 1..=3 {
            registry.register(R0, ClientId::new(id)).unwrap();
        }

        let live = registry.live(R0, |c| c != ClientId::new(2));
        assert_eq!(live, vec![ClientId::new(1), ClientId::new(3)]);
        assert_eq!(registry.listed(R0).len(), 2);
    }

    #[test]
    fn test_try_lock_contention() {
        let lock = ExclusiveLock::new(R0);
        let s1 = ClientId::new(1);
        let s2 = ClientId::new(2);

        lock.try_lock(s1).unwrap();
        assert_eq!(
            lock.try_lock(s2).unwrap_err(),
            ArbiterError::AlreadyLocked { resource: R0 }
        );
        // Holder may re-lock
        lock.try_lock(s1).unwrap();

        lock.unlock(s1).unwrap();
        lock.try_lock(s2).unwrap();
        assert!(lock.is_held_by(s2));
    }

    #[test]
    fn test_unlock_by_non_holder_leaves_holder() {
        let lock = ExclusiveLock::new(R0);
        lock.try_lock(ClientId::new(1)).unwrap();

        let err = lock.unlock(ClientId::new(2)).unwrap_err();
        assert_eq!(
            err,
            ArbiterError::NotHolder {
                client: ClientId::new(2),
                resource: R0
            }
        );
        assert_eq!(lock.holder(), Some(ClientId::new(1)));
    }

    #[test]
    fn test_owner_present_blocks_lock() {
        let lock = ExclusiveLock::new(R0);
        assert!(lock.claim_for_owner());
        assert!(lock.try_lock(ClientId::new(1)).is_err());

        lock.release_owner();
        lock.try_lock(ClientId::new(1)).unwrap();

        // A held lock keeps exclusive owners out
        assert!(!lock.claim_for_owner());
        assert!(!lock.owner_present());
    }

    #[test]
    fn test_release_owner_wakes_waiter() {
        let lock = Arc::new(ExclusiveLock::new(R0));
        assert!(lock.claim_for_owner());

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(ClientId::new(3), || true))
        };

        thread::sleep(Duration::from_millis(50));
        lock.release_owner();
        waiter.join().unwrap().unwrap();
        assert!(lock.is_held_by(ClientId::new(3)));
    }

    #[test]
    fn test_blocking_lock_wakes_on_unlock() {
        let lock = Arc::new(ExclusiveLock::new(R0));
        lock.try_lock(ClientId::new(1)).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(ClientId::new(2), || true))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(lock.holder(), Some(ClientId::new(1)));

        lock.unlock(ClientId::new(1)).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(lock.holder(), Some(ClientId::new(2)));
    }

    #[test]
    fn test_blocking_lock_aborts_when_waiter_dies() {
        let lock = Arc::new(ExclusiveLock::new(R0));
        let alive = Arc::new(AtomicBool::new(true));
        lock.try_lock(ClientId::new(1)).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            let alive = Arc::clone(&alive);
            thread::spawn(move || lock.lock(ClientId::new(2), || alive.load(Ordering::Acquire)))
        };

        thread::sleep(Duration::from_millis(50));
        alive.store(false, Ordering::Release);
        lock.forfeit(ClientId::new(2));

        let result = waiter.join().unwrap();
        assert_eq!(
            result,
            Err(ArbiterError::Disconnected {
                client: ClientId::new(2)
            })
        );
        assert_eq!(lock.holder(), Some(ClientId::new(1)));
    }
}
