//! Client connections.
//!
//! A connection is either an [`ExclusiveClient`], which owns its resource
//! outright, or a [`SharedClient`], which coexists with other shared
//! clients and may take the resource's advisory exclusive lock. Both carry
//! a [`ClientCore`] with the immutable connection facts and the
//! `destruction_started` flag every operation checks first.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize──▶ Connected ──disconnect──▶ Disconnected
//!       │                                                      ▲
//!       └──────────────────────disconnect──────────────────────┘
//! ```
//!
//! Teardown is idempotent: the first caller to flip `destruction_started`
//! performs it, every later caller returns immediately. Once the flag is
//! set, no operation reaches the device and no event is delivered.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - HAL failures are mapped to `ArbiterError::ResourceUnavailable`

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use camd_core::{
    AccessMode, ArbiterError, ArbiterResult, CallerIdentity, CallerRef, ClientCallbacks, ClientId,
    DeathNotifier, DeviceCommand, DeviceEvent, DeviceReply, DeviceSession, HardwareDriver,
    LockStatus, RemoteHandle, ResourceId, ResourceInfo, SoundKind,
};

use super::death::DeathWatch;
use super::Arbitrator;

// ============================================================================
// Shared Core
// ============================================================================

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Connected,
    Disconnected,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Facts common to both connection variants.
pub struct ClientCore {
    id: ClientId,
    info: ResourceInfo,
    caller: CallerIdentity,
    remote: RemoteHandle,
    service_pid: u32,
    connected_at: DateTime<Utc>,
    callbacks: Arc<dyn ClientCallbacks>,
    destruction_started: AtomicBool,
    ready: AtomicBool,
    sounds_held: AtomicBool,
    watch: Mutex<Option<DeathWatch>>,
    arbiter: Weak<Arbitrator>,
}

impl ClientCore {
    pub(crate) fn new(
        id: ClientId,
        info: ResourceInfo,
        caller: &CallerRef,
        arbiter: Weak<Arbitrator>,
    ) -> Self {
        Self {
            id,
            info,
            caller: caller.identity,
            remote: caller.remote,
            service_pid: std::process::id(),
            connected_at: Utc::now(),
            callbacks: Arc::clone(&caller.callbacks),
            destruction_started: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            sounds_held: AtomicBool::new(false),
            watch: Mutex::new(None),
            arbiter,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn resource(&self) -> ResourceId {
        self.info.id
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    pub fn caller(&self) -> CallerIdentity {
        self.caller
    }

    pub fn remote(&self) -> RemoteHandle {
        self.remote
    }

    pub fn service_pid(&self) -> u32 {
        self.service_pid
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_destroyed(&self) -> bool {
        self.destruction_started.load(Ordering::SeqCst)
    }

    /// True once the device is open and teardown has not started.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_destroyed()
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Atomically marks teardown as started. True only for the first caller.
    pub(crate) fn begin_destruction(&self) -> bool {
        !self.destruction_started.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn arbiter(&self) -> Option<Arc<Arbitrator>> {
        self.arbiter.upgrade()
    }

    fn gate(&self) -> ArbiterResult<()> {
        if self.is_destroyed() {
            return Err(ArbiterError::Disconnected { client: self.id });
        }
        Ok(())
    }

    fn deliver(&self, event: &DeviceEvent) {
        if self.is_destroyed() {
            trace!(client = %self.id, "Dropping event for client in teardown");
            return;
        }
        self.callbacks.on_device_event(self.id, self.info.id, event);
    }

    /// Installs the death watch. If teardown raced ahead, the watch is
    /// cancelled here instead.
    pub(crate) fn install_watch(&self, watch: DeathWatch, notifier: &dyn DeathNotifier) {
        *self.watch.lock() = Some(watch);
        if self.is_destroyed() {
            self.cancel_watch(notifier);
        }
    }

    pub(crate) fn cancel_watch(&self, notifier: &dyn DeathNotifier) {
        let watch = self.watch.lock().take();
        if let Some(watch) = watch {
            watch.cancel(notifier);
        }
    }

    /// Records that this client holds a reference on every sound. Returns
    /// false if teardown already ran, in which case the caller must give
    /// the references back itself.
    pub(crate) fn mark_sounds_held(&self) -> bool {
        self.sounds_held.store(true, Ordering::SeqCst);
        !(self.is_destroyed() && self.take_sounds_held())
    }

    pub(crate) fn take_sounds_held(&self) -> bool {
        self.sounds_held.swap(false, Ordering::SeqCst)
    }
}

impl fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCore")
            .field("id", &self.id)
            .field("resource", &self.info.id)
            .field("caller", &self.caller)
            .field("remote", &self.remote)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

/// Contract common to both connection variants.
pub trait BasicClient: Send + Sync {
    fn core(&self) -> &ClientCore;

    fn mode(&self) -> AccessMode;

    fn state(&self) -> ClientState;

    /// Tears the client down. Idempotent and safe to call from any thread,
    /// including from inside a death notification.
    fn disconnect(&self);

    fn id(&self) -> ClientId {
        self.core().id()
    }

    fn resource(&self) -> ResourceId {
        self.core().resource()
    }

    fn remote(&self) -> RemoteHandle {
        self.core().remote()
    }

    fn is_disconnected(&self) -> bool {
        self.core().is_destroyed()
    }

    /// Forwards a HAL event to the caller unless teardown started.
    fn notify(&self, event: &DeviceEvent) {
        self.core().deliver(event);
    }
}

fn hal_failure(resource: ResourceId, err: impl fmt::Display) -> ArbiterError {
    ArbiterError::ResourceUnavailable {
        resource,
        reason: err.to_string(),
    }
}

// ============================================================================
// ExclusiveClient
// ============================================================================

struct ExclusiveState {
    state: ClientState,
    device: Option<Box<dyn DeviceSession>>,
    preview: bool,
    recording: bool,
    shutter_sound: bool,
}

/// Connection that owns its resource exclusively.
pub struct ExclusiveClient {
    core: ClientCore,
    inner: Mutex<ExclusiveState>,
}

impl ExclusiveClient {
    pub(crate) fn new(core: ClientCore) -> Self {
        Self {
            core,
            inner: Mutex::new(ExclusiveState {
                state: ClientState::Uninitialized,
                device: None,
                preview: false,
                recording: false,
                shutter_sound: true,
            }),
        }
    }

    /// Opens the device in exclusive mode.
    ///
    /// Runs under the resource's slot lock.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` if teardown already started
    /// - `ArbiterError::ResourceUnavailable` if the driver fails to open
    pub(crate) fn initialize(&self, driver: &dyn HardwareDriver) -> ArbiterResult<()> {
        self.core.gate()?;
        let resource = self.core.resource();

        let session = driver
            .open(resource, AccessMode::Exclusive)
            .map_err(|e| hal_failure(resource, e))?;

        let mut inner = self.inner.lock();
        if self.core.is_destroyed() {
            drop(inner);
            session.close();
            return Err(ArbiterError::Disconnected {
                client: self.core.id(),
            });
        }
        inner.device = Some(session);
        inner.state = ClientState::Connected;
        self.core.mark_ready();
        debug!(client = %self.core.id(), resource = %resource, "Exclusive device opened");
        Ok(())
    }

    /// Closes the device and enters `Disconnected`. Runs under the slot lock.
    pub(crate) fn close_device(&self) {
        let device = {
            let mut inner = self.inner.lock();
            inner.state = ClientState::Disconnected;
            inner.preview = false;
            inner.recording = false;
            inner.device.take()
        };
        if let Some(device) = device {
            device.close();
            debug!(client = %self.core.id(), "Exclusive device closed");
        }
    }

    fn run(&self, command: &DeviceCommand) -> ArbiterResult<DeviceReply> {
        let mut inner = self.inner.lock();
        self.run_locked(&mut inner, command)
    }

    fn run_locked(
        &self,
        inner: &mut ExclusiveState,
        command: &DeviceCommand,
    ) -> ArbiterResult<DeviceReply> {
        self.core.gate()?;
        let disconnected = ArbiterError::Disconnected {
            client: self.core.id(),
        };
        if inner.state != ClientState::Connected {
            return Err(disconnected);
        }
        let device = inner.device.as_mut().ok_or(disconnected)?;
        trace!(client = %self.core.id(), command = command.name(), "Executing command");
        device
            .execute(command)
            .map_err(|e| hal_failure(self.core.resource(), e))
    }

    fn play(&self, kind: SoundKind) {
        if let Some(arbiter) = self.core.arbiter() {
            arbiter.sounds().play(kind);
        }
    }

    pub fn start_preview(&self) -> ArbiterResult<()> {
        let mut inner = self.inner.lock();
        self.run_locked(&mut inner, &DeviceCommand::StartPreview)?;
        inner.preview = true;
        Ok(())
    }

    pub fn stop_preview(&self) -> ArbiterResult<()> {
        let mut inner = self.inner.lock();
        self.run_locked(&mut inner, &DeviceCommand::StopPreview)?;
        inner.preview = false;
        Ok(())
    }

    pub fn preview_enabled(&self) -> ArbiterResult<bool> {
        self.core.gate()?;
        Ok(self.inner.lock().preview)
    }

    pub fn start_recording(&self) -> ArbiterResult<()> {
        {
            let mut inner = self.inner.lock();
            self.run_locked(&mut inner, &DeviceCommand::StartRecording)?;
            inner.recording = true;
        }
        self.play(SoundKind::Recording);
        Ok(())
    }

    pub fn stop_recording(&self) -> ArbiterResult<()> {
        {
            let mut inner = self.inner.lock();
            self.run_locked(&mut inner, &DeviceCommand::StopRecording)?;
            inner.recording = false;
        }
        self.play(SoundKind::Recording);
        Ok(())
    }

    pub fn recording_enabled(&self) -> ArbiterResult<bool> {
        self.core.gate()?;
        Ok(self.inner.lock().recording)
    }

    pub fn auto_focus(&self) -> ArbiterResult<()> {
        self.run(&DeviceCommand::AutoFocus).map(|_| ())
    }

    pub fn cancel_auto_focus(&self) -> ArbiterResult<()> {
        self.run(&DeviceCommand::CancelAutoFocus).map(|_| ())
    }

    /// Captures a still, playing the shutter sound unless it was disabled.
    pub fn take_picture(&self) -> ArbiterResult<()> {
        let shutter = {
            let mut inner = self.inner.lock();
            self.run_locked(&mut inner, &DeviceCommand::TakePicture)?;
            inner.shutter_sound
        };
        if shutter {
            self.play(SoundKind::Shutter);
        }
        Ok(())
    }

    pub fn set_parameters(&self, params: impl Into<String>) -> ArbiterResult<()> {
        self.run(&DeviceCommand::SetParameters {
            params: params.into(),
        })
        .map(|_| ())
    }

    pub fn get_parameters(&self) -> ArbiterResult<String> {
        match self.run(&DeviceCommand::GetParameters)? {
            DeviceReply::Parameters { params } => Ok(params),
            other => Err(hal_failure(
                self.core.resource(),
                format!("unexpected reply {other:?} to get_parameters"),
            )),
        }
    }

    pub fn send_command(&self, cmd: i32, arg1: i32, arg2: i32) -> ArbiterResult<()> {
        self.run(&DeviceCommand::SendCommand { cmd, arg1, arg2 })
            .map(|_| ())
    }

    /// Enables or disables the shutter sound for `take_picture`.
    pub fn enable_shutter_sound(&self, enabled: bool) -> ArbiterResult<()> {
        self.core.gate()?;
        self.inner.lock().shutter_sound = enabled;
        debug!(client = %self.core.id(), enabled, "Shutter sound toggled");
        Ok(())
    }

    /// Dispatches any exclusive-mode command through its typed operation.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::UnsupportedCommand` for shared-only commands
    /// - whatever the typed operation returns
    pub fn execute(&self, command: &DeviceCommand) -> ArbiterResult<DeviceReply> {
        self.core.gate()?;
        match command {
            DeviceCommand::StartPreview => self.start_preview().map(|_| DeviceReply::Done),
            DeviceCommand::StopPreview => self.stop_preview().map(|_| DeviceReply::Done),
            DeviceCommand::StartRecording => self.start_recording().map(|_| DeviceReply::Done),
            DeviceCommand::StopRecording => self.stop_recording().map(|_| DeviceReply::Done),
            DeviceCommand::AutoFocus => self.auto_focus().map(|_| DeviceReply::Done),
            DeviceCommand::CancelAutoFocus => self.cancel_auto_focus().map(|_| DeviceReply::Done),
            DeviceCommand::TakePicture => self.take_picture().map(|_| DeviceReply::Done),
            DeviceCommand::SetParameters { params } => {
                self.set_parameters(params.as_str()).map(|_| DeviceReply::Done)
            }
            DeviceCommand::GetParameters => self
                .get_parameters()
                .map(|params| DeviceReply::Parameters { params }),
            DeviceCommand::SendCommand { cmd, arg1, arg2 } => self
                .send_command(*cmd, *arg1, *arg2)
                .map(|_| DeviceReply::Done),
            DeviceCommand::SubmitRequest { .. }
            | DeviceCommand::CancelRequest { .. }
            | DeviceCommand::RequestStream { .. }
            | DeviceCommand::CancelStream { .. } => Err(ArbiterError::UnsupportedCommand {
                command: command.name(),
                variant: "exclusive",
            }),
        }
    }
}

impl BasicClient for ExclusiveClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn mode(&self) -> AccessMode {
        AccessMode::Exclusive
    }

    fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    fn disconnect(&self) {
        if !self.core.begin_destruction() {
            trace!(client = %self.core.id(), "Disconnect already in progress");
            return;
        }
        info!(
            client = %self.core.id(),
            resource = %self.core.resource(),
            pid = self.core.caller().pid,
            "Disconnecting exclusive client"
        );
        match self.core.arbiter() {
            Some(arbiter) => arbiter.teardown_exclusive(self),
            None => self.close_device(),
        }
    }
}

impl fmt::Debug for ExclusiveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveClient")
            .field("core", &self.core)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// SharedClient
// ============================================================================

struct SharedState {
    state: ClientState,
    device: Option<Box<dyn DeviceSession>>,
}

/// Connection that shares its resource with other shared clients.
pub struct SharedClient {
    core: ClientCore,
    inner: Mutex<SharedState>,
}

impl SharedClient {
    pub(crate) fn new(core: ClientCore) -> Self {
        Self {
            core,
            inner: Mutex::new(SharedState {
                state: ClientState::Uninitialized,
                device: None,
            }),
        }
    }

    /// Opens the device in shared mode. Runs under the slot lock.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` if teardown already started
    /// - `ArbiterError::ResourceUnavailable` if the driver fails to open
    pub(crate) fn initialize(&self, driver: &dyn HardwareDriver) -> ArbiterResult<()> {
        self.core.gate()?;
        let resource = self.core.resource();

        let session = driver
            .open(resource, AccessMode::Shared)
            .map_err(|e| hal_failure(resource, e))?;

        let mut inner = self.inner.lock();
        if self.core.is_destroyed() {
            drop(inner);
            session.close();
            return Err(ArbiterError::Disconnected {
                client: self.core.id(),
            });
        }
        inner.device = Some(session);
        inner.state = ClientState::Connected;
        self.core.mark_ready();
        debug!(client = %self.core.id(), resource = %resource, "Shared device opened");
        Ok(())
    }

    pub(crate) fn close_device(&self) {
        let device = {
            let mut inner = self.inner.lock();
            inner.state = ClientState::Disconnected;
            inner.device.take()
        };
        if let Some(device) = device {
            device.close();
            debug!(client = %self.core.id(), "Shared device closed");
        }
    }

    fn run(&self, command: &DeviceCommand) -> ArbiterResult<DeviceReply> {
        self.core.gate()?;
        let disconnected = ArbiterError::Disconnected {
            client: self.core.id(),
        };
        let mut inner = self.inner.lock();
        if inner.state != ClientState::Connected {
            return Err(disconnected);
        }
        let device = inner.device.as_mut().ok_or(disconnected)?;
        trace!(client = %self.core.id(), command = command.name(), "Executing command");
        device
            .execute(command)
            .map_err(|e| hal_failure(self.core.resource(), e))
    }

    /// Submits a capture request. Returns the HAL's request id.
    pub fn submit_request(&self, metadata: impl Into<String>, streaming: bool) -> ArbiterResult<i32> {
        let reply = self.run(&DeviceCommand::SubmitRequest {
            metadata: metadata.into(),
            streaming,
        })?;
        match reply {
            DeviceReply::RequestId { request_id } => Ok(request_id),
            other => Err(hal_failure(
                self.core.resource(),
                format!("unexpected reply {other:?} to submit_request"),
            )),
        }
    }

    pub fn cancel_request(&self, request_id: i32) -> ArbiterResult<()> {
        self.run(&DeviceCommand::CancelRequest { request_id })
            .map(|_| ())
    }

    pub fn request_stream(&self, stream_id: i32) -> ArbiterResult<()> {
        self.run(&DeviceCommand::RequestStream { stream_id })
            .map(|_| ())
    }

    pub fn cancel_stream(&self, stream_id: i32) -> ArbiterResult<()> {
        self.run(&DeviceCommand::CancelStream { stream_id })
            .map(|_| ())
    }

    /// Takes the resource's exclusive lock without waiting.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` after teardown
    /// - `ArbiterError::AlreadyLocked` if another shared client holds the
    ///   lock or an exclusive client owns the resource
    pub fn exclusive_try_lock(&self) -> ArbiterResult<()> {
        self.core.gate()?;
        let arbiter = self.arbiter_or_disconnected()?;
        let lock = arbiter.exclusive_lock_for(self.core.resource())?;
        let newly = !lock.is_held_by(self.core.id());
        lock.try_lock(self.core.id())?;
        if newly {
            self.report_lock(&arbiter, LockStatus::Acquired);
        }
        Ok(())
    }

    /// Takes the resource's exclusive lock, blocking until it is free.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` if the client is torn down before or
    ///   while waiting
    pub fn exclusive_lock(&self) -> ArbiterResult<()> {
        self.core.gate()?;
        let arbiter = self.arbiter_or_disconnected()?;
        let lock = arbiter.exclusive_lock_for(self.core.resource())?;
        let newly = !lock.is_held_by(self.core.id());
        lock.lock(self.core.id(), || !self.core.is_destroyed())?;

        // Teardown may have run between acquisition and here
        if self.core.is_destroyed() {
            lock.forfeit(self.core.id());
            return Err(ArbiterError::Disconnected {
                client: self.core.id(),
            });
        }
        if newly {
            self.report_lock(&arbiter, LockStatus::Acquired);
        }
        Ok(())
    }

    /// Releases the exclusive lock.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::Disconnected` after teardown
    /// - `ArbiterError::NotHolder` if this client is not the holder
    pub fn exclusive_unlock(&self) -> ArbiterResult<()> {
        self.core.gate()?;
        let arbiter = self.arbiter_or_disconnected()?;
        arbiter
            .exclusive_lock_for(self.core.resource())?
            .unlock(self.core.id())?;
        self.report_lock(&arbiter, LockStatus::Released);
        Ok(())
    }

    pub fn has_exclusive_lock(&self) -> bool {
        if self.core.is_destroyed() {
            return false;
        }
        self.core.arbiter().is_some_and(|arbiter| {
            arbiter
                .exclusive_lock_for(self.core.resource())
                .is_ok_and(|lock| lock.is_held_by(self.core.id()))
        })
    }

    /// Dispatches a shared-mode command.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::UnsupportedCommand` for exclusive-only commands
    pub fn execute(&self, command: &DeviceCommand) -> ArbiterResult<DeviceReply> {
        self.core.gate()?;
        match command {
            DeviceCommand::SubmitRequest {
                metadata,
                streaming,
            } => self
                .submit_request(metadata.as_str(), *streaming)
                .map(|request_id| DeviceReply::RequestId { request_id }),
            DeviceCommand::CancelRequest { request_id } => {
                self.cancel_request(*request_id).map(|_| DeviceReply::Done)
            }
            DeviceCommand::RequestStream { stream_id } => {
                self.request_stream(*stream_id).map(|_| DeviceReply::Done)
            }
            DeviceCommand::CancelStream { stream_id } => {
                self.cancel_stream(*stream_id).map(|_| DeviceReply::Done)
            }
            other => Err(ArbiterError::UnsupportedCommand {
                command: other.name(),
                variant: "shared",
            }),
        }
    }

    fn arbiter_or_disconnected(&self) -> ArbiterResult<Arc<Arbitrator>> {
        self.core.arbiter().ok_or(ArbiterError::Disconnected {
            client: self.core.id(),
        })
    }

    fn report_lock(&self, arbiter: &Arbitrator, status: LockStatus) {
        debug!(client = %self.core.id(), status = ?status, "Exclusive lock status changed");
        let event = DeviceEvent::LockStatus { status };
        if arbiter
            .with_slot_guard(self.core.resource(), || self.core.deliver(&event))
            .is_err()
        {
            self.core.deliver(&event);
        }
    }
}

impl BasicClient for SharedClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn mode(&self) -> AccessMode {
        AccessMode::Shared
    }

    fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    fn disconnect(&self) {
        if !self.core.begin_destruction() {
            trace!(client = %self.core.id(), "Disconnect already in progress");
            return;
        }
        info!(
            client = %self.core.id(),
            resource = %self.core.resource(),
            pid = self.core.caller().pid,
            "Disconnecting shared client"
        );
        match self.core.arbiter() {
            Some(arbiter) => arbiter.teardown_shared(self),
            None => self.close_device(),
        }
    }
}

impl fmt::Debug for SharedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClient")
            .field("core", &self.core)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A live connection of either variant.
#[derive(Debug, Clone)]
pub enum Connection {
    Exclusive(Arc<ExclusiveClient>),
    Shared(Arc<SharedClient>),
}

impl Connection {
    pub fn as_basic(&self) -> &dyn BasicClient {
        match self {
            Self::Exclusive(client) => client.as_ref(),
            Self::Shared(client) => client.as_ref(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.as_basic().id()
    }

    pub fn resource(&self) -> ResourceId {
        self.as_basic().resource()
    }

    pub fn remote(&self) -> RemoteHandle {
        self.as_basic().remote()
    }

    pub fn mode(&self) -> AccessMode {
        self.as_basic().mode()
    }

    pub fn is_disconnected(&self) -> bool {
        self.as_basic().is_disconnected()
    }

    /// Forwards any command to the variant, which rejects commands of the
    /// other mode with `UnsupportedCommand`.
    pub fn execute(&self, command: &DeviceCommand) -> ArbiterResult<DeviceReply> {
        match self {
            Self::Exclusive(client) => client.execute(command),
            Self::Shared(client) => client.execute(command),
        }
    }

    pub fn disconnect(&self) {
        self.as_basic().disconnect();
    }
}

impl From<Arc<ExclusiveClient>> for Connection {
    fn from(client: Arc<ExclusiveClient>) -> Self {
        Self::Exclusive(client)
    }
}

impl From<Arc<SharedClient>> for Connection {
    fn from(client: Arc<SharedClient>) -> Self {
        Self::Shared(client)
    }
}
