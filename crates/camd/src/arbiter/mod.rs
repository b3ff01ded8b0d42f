//! Camera resource arbitration.
//!
//! The [`Arbitrator`] decides which client may use which resource. It owns
//! the resource table, the shared-client registry and the arena of live
//! connections, and it is the only place that knows the lock order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  connect_*   ┌──────────────────────────────────────┐
//! │   Callers    │─────────────▶│             Arbitrator               │
//! └──────────────┘              │                                      │
//!        ▲                      │  global lock: ResourceTable          │
//!        │ events               │               SharedClientRegistry   │
//!        │                      │               arena (id → Connection)│
//! ┌──────┴───────┐              │  per slot:    slot lock (HAL I/O)    │
//! │ HAL threads  │─dispatch────▶│               ExclusiveLock (leaf)   │
//! └──────────────┘              └──────────────────────────────────────┘
//!                                        │ remote died
//!                               ┌────────┴────────┐
//!                               │  DeathWatcher   │
//!                               └─────────────────┘
//! ```
//!
//! # Lock Order
//!
//! global → slot → client state → exclusive-lock sub-lock. The sound lock
//! is a separate leaf. HAL calls are made only under a slot lock, never
//! under the global lock. Lock-status events are delivered under the slot
//! lock too, after the exclusive-lock sub-lock has been released.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - No direct indexing; slots are reached through `.get()`
//! - Teardown never fails; missing entries are logged and skipped

mod client;
mod death;
mod shared;
mod table;

pub use client::{BasicClient, ClientCore, ClientState, Connection, ExclusiveClient, SharedClient};
pub use death::{DeathWatch, DeathWatcher};
pub use shared::{ExclusiveLock, SharedClientRegistry};
pub use table::{ResourceSlot, ResourceTable};

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use camd_core::{
    ArbiterError, ArbiterResult, CallerRef, ClientId, DeathNotifier, DeviceEvent, HardwareDriver,
    RemoteHandle, ResourceId, ResourceInfo, SoundKind, SoundLoader, MAX_RESOURCES,
};

use crate::access::AccessPolicy;
use crate::sound::SoundManager;

/// State guarded by the global lock.
struct ArbiterState {
    table: ResourceTable,
    shared: SharedClientRegistry,
    clients: HashMap<ClientId, Connection>,
}

/// Per-resource synchronization, fixed at construction.
struct SlotSync {
    /// Serializes HAL open/close and event delivery for the slot.
    guard: Mutex<()>,
    exclusive: ExclusiveLock,
}

/// The arbitration service.
///
/// Always handled through an `Arc`; clients keep a `Weak` back-reference so
/// a dropped arbitrator never lingers because of them.
pub struct Arbitrator {
    driver: Arc<dyn HardwareDriver>,
    notifier: Arc<dyn DeathNotifier>,
    sounds: SoundManager,
    policy: AccessPolicy,
    state: Mutex<ArbiterState>,
    slots: Vec<SlotSync>,
    next_client: AtomicU64,
    self_ref: Weak<Arbitrator>,
}

impl Arbitrator {
    /// Builds an arbitrator with every resource free.
    ///
    /// Resources are read from the driver once. More than
    /// [`MAX_RESOURCES`] devices are truncated with a warning.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::ResourceUnavailable` if the driver cannot describe
    ///   one of its devices
    pub fn new(
        driver: Arc<dyn HardwareDriver>,
        notifier: Arc<dyn DeathNotifier>,
        sound_loader: Arc<dyn SoundLoader>,
        policy: AccessPolicy,
    ) -> Result<Arc<Self>, ArbiterError> {
        let reported = driver.resource_count();
        let count = if reported > MAX_RESOURCES {
            warn!(
                reported,
                max = MAX_RESOURCES,
                "Driver reports more resources than supported, truncating"
            );
            MAX_RESOURCES
        } else {
            reported
        };

        let mut infos = Vec::with_capacity(count);
        for index in 0..count {
            let id = ResourceId::new(u32::try_from(index).unwrap_or(u32::MAX));
            let info = driver
                .describe(id)
                .map_err(|e| ArbiterError::ResourceUnavailable {
                    resource: id,
                    reason: e.to_string(),
                })?;
            infos.push(info);
        }

        let slots = infos
            .iter()
            .map(|info| SlotSync {
                guard: Mutex::new(()),
                exclusive: ExclusiveLock::new(info.id),
            })
            .collect();

        info!(resources = count, "Arbitrator initialized");

        Ok(Arc::new_cyclic(|self_ref| Self {
            driver,
            notifier,
            sounds: SoundManager::new(sound_loader),
            policy,
            state: Mutex::new(ArbiterState {
                table: ResourceTable::new(infos),
                shared: SharedClientRegistry::new(count),
                clients: HashMap::new(),
            }),
            slots,
            next_client: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        }))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn resource_count(&self) -> usize {
        self.slots.len()
    }

    /// Every resource descriptor, ordered by id.
    pub fn enumerate_resources(&self) -> Vec<ResourceInfo> {
        self.state.lock().table.infos()
    }

    /// # Errors
    ///
    /// - `ArbiterError::InvalidId` if the id is out of range
    pub fn describe_resource(&self, resource: ResourceId) -> ArbiterResult<ResourceInfo> {
        self.state.lock().table.info(resource).cloned()
    }

    pub fn is_busy(&self, resource: ResourceId) -> bool {
        self.state.lock().table.is_busy(resource)
    }

    pub fn sounds(&self) -> &SoundManager {
        &self.sounds
    }

    /// Looks up a live connection by id.
    pub fn client(&self, id: ClientId) -> Option<Connection> {
        self.state.lock().clients.get(&id).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Current exclusive owner of a resource.
    pub fn exclusive_owner(&self, resource: ResourceId) -> Option<Arc<ExclusiveClient>> {
        let state = self.state.lock();
        let owner = state.table.lookup(resource)?;
        match state.clients.get(&owner) {
            Some(Connection::Exclusive(client)) => Some(Arc::clone(client)),
            _ => None,
        }
    }

    /// Live shared clients of a resource, in connect order.
    pub fn shared_clients(&self, resource: ResourceId) -> Vec<Arc<SharedClient>> {
        let mut guard = self.state.lock();
        let ArbiterState {
            shared, clients, ..
        } = &mut *guard;
        shared
            .live(resource, |id| clients.contains_key(&id))
            .into_iter()
            .filter_map(|id| match clients.get(&id) {
                Some(Connection::Shared(client)) => Some(Arc::clone(client)),
                _ => None,
            })
            .collect()
    }

    /// Every live connection opened through `remote`.
    pub fn clients_by_remote(&self, remote: RemoteHandle) -> Vec<Connection> {
        let mut found: Vec<Connection> = self
            .state
            .lock()
            .clients
            .values()
            .filter(|conn| conn.remote() == remote)
            .cloned()
            .collect();
        found.sort_by_key(Connection::id);
        found
    }

    /// The exclusive lock of a resource.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::InvalidId` if the id is out of range
    pub fn exclusive_lock_for(&self, resource: ResourceId) -> ArbiterResult<&ExclusiveLock> {
        self.slot(resource).map(|slot| &slot.exclusive)
    }

    /// Runs `f` under the slot lock, ordering it with HAL event delivery.
    ///
    /// Must not be called while holding the global or a slot lock.
    pub(crate) fn with_slot_guard<R>(
        &self,
        resource: ResourceId,
        f: impl FnOnce() -> R,
    ) -> ArbiterResult<R> {
        let slot = self.slot(resource)?;
        let _guard = slot.guard.lock();
        Ok(f())
    }

    fn slot(&self, resource: ResourceId) -> ArbiterResult<&SlotSync> {
        self.slots
            .get(resource.index())
            .ok_or(ArbiterError::InvalidId {
                resource,
                count: self.slots.len(),
            })
    }

    fn allocate_id(&self) -> ClientId {
        ClientId::new(self.next_client.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------------

    /// Connects `caller` to `resource` as its exclusive owner.
    ///
    /// A caller whose remote already owns the resource gets its existing
    /// handle back.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::PermissionDenied` if the caller is not admitted
    /// - `ArbiterError::InvalidId` if the id is out of range
    /// - `ArbiterError::AlreadyBusy` if another client owns the resource or
    ///   a shared client holds its exclusive lock
    /// - `ArbiterError::ResourceUnavailable` if the driver fails to open
    /// - `ArbiterError::Disconnected` if the caller's remote is already dead
    pub fn connect_exclusive(
        &self,
        caller: CallerRef,
        resource: ResourceId,
    ) -> ArbiterResult<Arc<ExclusiveClient>> {
        self.policy.check(&caller.identity)?;
        let slot = self.slot(resource)?;

        let client = {
            let mut state = self.state.lock();
            let info = state.table.info(resource)?.clone();

            if let Some(owner) = state.table.lookup(resource) {
                if let Some(Connection::Exclusive(existing)) = state.clients.get(&owner) {
                    if existing.remote() == caller.remote && existing.core().is_ready() {
                        debug!(client = %owner, resource = %resource, "Same remote reconnected");
                        return Ok(Arc::clone(existing));
                    }
                }
                debug!(resource = %resource, owner = %owner, "Exclusive connect rejected");
                return Err(ArbiterError::AlreadyBusy { resource });
            }

            if !slot.exclusive.claim_for_owner() {
                debug!(resource = %resource, "Exclusive connect rejected, shared lock held");
                return Err(ArbiterError::AlreadyBusy { resource });
            }

            let id = self.allocate_id();
            if let Err(e) = state.table.try_acquire(resource, id) {
                slot.exclusive.release_owner();
                return Err(e);
            }

            let client = Arc::new(ExclusiveClient::new(ClientCore::new(
                id,
                info,
                &caller,
                self.self_ref.clone(),
            )));
            state
                .clients
                .insert(id, Connection::Exclusive(Arc::clone(&client)));
            client
        };

        let opened = {
            let _slot = slot.guard.lock();
            client.initialize(self.driver.as_ref())
        };
        if let Err(e) = opened {
            warn!(client = %client.id(), resource = %resource, error = %e, "Exclusive open failed");
            client.disconnect();
            return Err(e);
        }

        self.sounds.acquire_all();
        if !client.core().mark_sounds_held() {
            self.sounds.release_all();
        }

        let connection = Connection::Exclusive(Arc::clone(&client));
        self.arm(client.core(), &connection)?;

        info!(
            client = %client.id(),
            resource = %resource,
            pid = caller.identity.pid,
            remote = %caller.remote,
            "Exclusive client connected"
        );
        Ok(client)
    }

    /// Connects `caller` to `resource` as a shared client.
    ///
    /// Shared clients coexist with each other and with an exclusive owner.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::PermissionDenied` if the caller is not admitted
    /// - `ArbiterError::InvalidId` if the id is out of range
    /// - `ArbiterError::ResourceUnavailable` if the driver fails to open
    /// - `ArbiterError::Disconnected` if the caller's remote is already dead
    pub fn connect_shared(
        &self,
        caller: CallerRef,
        resource: ResourceId,
    ) -> ArbiterResult<Arc<SharedClient>> {
        self.policy.check(&caller.identity)?;
        let slot = self.slot(resource)?;

        let client = {
            let mut state = self.state.lock();
            let info = state.table.info(resource)?.clone();
            let id = self.allocate_id();
            state.shared.register(resource, id)?;

            let client = Arc::new(SharedClient::new(ClientCore::new(
                id,
                info,
                &caller,
                self.self_ref.clone(),
            )));
            state
                .clients
                .insert(id, Connection::Shared(Arc::clone(&client)));
            client
        };

        let opened = {
            let _slot = slot.guard.lock();
            client.initialize(self.driver.as_ref())
        };
        if let Err(e) = opened {
            warn!(client = %client.id(), resource = %resource, error = %e, "Shared open failed");
            client.disconnect();
            return Err(e);
        }

        let connection = Connection::Shared(Arc::clone(&client));
        self.arm(client.core(), &connection)?;

        info!(
            client = %client.id(),
            resource = %resource,
            pid = caller.identity.pid,
            remote = %caller.remote,
            "Shared client connected"
        );
        Ok(client)
    }

    /// Registers the death watch, unwinding the client if its remote is gone.
    fn arm(&self, core: &ClientCore, connection: &Connection) -> ArbiterResult<()> {
        let watched = DeathWatcher::watch(
            self.notifier.as_ref(),
            core.remote(),
            core.id(),
            self.self_ref.clone(),
        );
        match watched {
            Ok(watch) => {
                core.install_watch(watch, self.notifier.as_ref());
                if core.is_destroyed() {
                    return Err(ArbiterError::Disconnected { client: core.id() });
                }
                Ok(())
            }
            Err(e) => {
                warn!(client = %core.id(), error = %e, "Caller died during connect");
                connection.disconnect();
                Err(ArbiterError::Disconnected { client: core.id() })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------------

    /// Disconnects a client by id. Returns false if no such client is live.
    pub fn disconnect_client(&self, id: ClientId) -> bool {
        let connection = self.state.lock().clients.get(&id).cloned();
        match connection {
            Some(connection) => {
                connection.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnects every client opened through `remote`. Returns how many.
    pub fn remove_client_by_remote(&self, remote: RemoteHandle) -> usize {
        let connections = self.clients_by_remote(remote);
        for connection in &connections {
            connection.disconnect();
        }
        if !connections.is_empty() {
            info!(remote = %remote, count = connections.len(), "Removed clients for remote");
        }
        connections.len()
    }

    /// Disconnects every live client. Returns how many.
    pub fn shutdown(&self) -> usize {
        let connections: Vec<Connection> = self.state.lock().clients.values().cloned().collect();
        for connection in &connections {
            connection.disconnect();
        }
        info!(count = connections.len(), "Arbitrator shut down");
        connections.len()
    }

    /// Second half of an exclusive client's teardown, after its destruction
    /// flag was set.
    pub(crate) fn teardown_exclusive(&self, client: &ExclusiveClient) {
        let core = client.core();
        let resource = core.resource();
        let slot = self.slots.get(resource.index());

        match slot {
            Some(slot) => {
                let _guard = slot.guard.lock();
                client.close_device();
            }
            None => client.close_device(),
        }

        {
            let mut state = self.state.lock();
            if state.table.release(resource, core.id()) {
                if let Some(slot) = slot {
                    slot.exclusive.release_owner();
                }
            }
            state.clients.remove(&core.id());
        }

        core.cancel_watch(self.notifier.as_ref());
        if core.take_sounds_held() {
            self.sounds.release_all();
        }
        info!(client = %core.id(), resource = %resource, "Exclusive client disconnected");
    }

    /// Second half of a shared client's teardown.
    pub(crate) fn teardown_shared(&self, client: &SharedClient) {
        let core = client.core();
        let resource = core.resource();
        let slot = self.slots.get(resource.index());

        match slot {
            Some(slot) => {
                let _guard = slot.guard.lock();
                client.close_device();
            }
            None => client.close_device(),
        }

        {
            let mut state = self.state.lock();
            state.shared.unregister(resource, core.id());
            state.clients.remove(&core.id());
        }

        if let Some(slot) = slot {
            if slot.exclusive.forfeit(core.id()) {
                debug!(client = %core.id(), resource = %resource, "Exclusive lock released by teardown");
            }
        }

        core.cancel_watch(self.notifier.as_ref());
        info!(client = %core.id(), resource = %resource, "Shared client disconnected");
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Delivers a HAL event to every live client of `resource`.
    ///
    /// Must be called from a HAL-owned thread, never from inside
    /// `DeviceSession::execute`. Returns how many clients were targeted.
    pub fn dispatch_device_event(&self, resource: ResourceId, event: &DeviceEvent) -> usize {
        let Ok(slot) = self.slot(resource) else {
            warn!(resource = %resource, "Event for unknown resource dropped");
            return 0;
        };

        let targets: Vec<Connection> = {
            let mut guard = self.state.lock();
            let ArbiterState {
                table,
                shared,
                clients,
            } = &mut *guard;

            let owner = table
                .lookup(resource)
                .and_then(|id| clients.get(&id).cloned());
            let live = shared.live(resource, |id| clients.contains_key(&id));
            owner
                .into_iter()
                .chain(live.into_iter().filter_map(|id| clients.get(&id).cloned()))
                .collect()
        };

        let _guard = slot.guard.lock();
        let mut delivered = 0;
        for target in &targets {
            if !target.is_disconnected() {
                target.as_basic().notify(event);
                delivered += 1;
            }
        }
        debug!(resource = %resource, event = ?event, delivered, "Device event dispatched");
        delivered
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Human-readable snapshot of the arbitration state.
    pub fn dump_state(&self) -> String {
        let (slots, clients): (Vec<ResourceSlot>, HashMap<ClientId, Connection>) = {
            let state = self.state.lock();
            (state.table.slots().cloned().collect(), state.clients.clone())
        };

        let mut out = String::new();
        let _ = writeln!(out, "camd arbitration state (pid {})", std::process::id());
        let _ = writeln!(
            out,
            "Resources: {} (max {}), live clients: {}",
            slots.len(),
            MAX_RESOURCES,
            clients.len()
        );

        for slot in &slots {
            let resource = slot.info().id;
            let _ = writeln!(out, "\n{}", slot.info());

            match slot.owner().and_then(|id| clients.get(&id)) {
                Some(Connection::Exclusive(owner)) => {
                    let core = owner.core();
                    let _ = writeln!(
                        out,
                        "  exclusive: {} pid {} uid {} {} state {} since {}",
                        core.id(),
                        core.caller().pid,
                        core.caller().uid,
                        core.remote(),
                        owner.state(),
                        core.connected_at().to_rfc3339(),
                    );
                }
                _ => {
                    let _ = writeln!(out, "  exclusive: none");
                }
            }

            let mut shared: Vec<&Arc<SharedClient>> = clients
                .values()
                .filter_map(|conn| match conn {
                    Connection::Shared(client) if client.resource() == resource => Some(client),
                    _ => None,
                })
                .collect();
            shared.sort_by_key(|client| client.id());

            if shared.is_empty() {
                let _ = writeln!(out, "  shared: none");
            }
            for client in shared {
                let core = client.core();
                let _ = writeln!(
                    out,
                    "  shared: {} pid {} uid {} {} state {}",
                    core.id(),
                    core.caller().pid,
                    core.caller().uid,
                    core.remote(),
                    client.state(),
                );
            }

            let holder = self
                .slots
                .get(resource.index())
                .and_then(|s| s.exclusive.holder());
            match holder {
                Some(holder) => {
                    let _ = writeln!(out, "  lock holder: {holder}");
                }
                None => {
                    let _ = writeln!(out, "  lock holder: none");
                }
            }
        }

        let _ = writeln!(out);
        for kind in SoundKind::ALL {
            let _ = writeln!(
                out,
                "Sound {}: refs {}, loaded {}",
                kind,
                self.sounds.ref_count(kind),
                self.sounds.is_loaded(kind)
            );
        }
        out
    }
}

impl std::fmt::Debug for Arbitrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbitrator")
            .field("resources", &self.slots.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
