//! Simulated hardware driver.
//!
//! The daemon has no camera stack to talk to, so it arbitrates over
//! [`SimulatedDriver`]: devices come from configuration, sessions accept
//! every command, and capture commands raise asynchronous events on a
//! dedicated HAL thread the way a real driver would.
//!
//! Fault injection (`set_available`, `set_failing`) and open/close counters
//! make the driver usable as a test double.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use camd_core::{
    AccessMode, DeviceCommand, DeviceEvent, DeviceReply, DeviceSession, Facing, HalError,
    HardwareDriver, ResourceId, ResourceInfo,
};

/// Receiver of driver-originated events.
pub type EventSink = Arc<dyn Fn(ResourceId, DeviceEvent) + Send + Sync>;

type EventSender = mpsc::UnboundedSender<(ResourceId, DeviceEvent)>;

/// Default parameter string reported before any `set_parameters`.
pub const DEFAULT_PARAMETERS: &str = "preview-size=1280x720;picture-size=4032x3024";

struct DeviceState {
    info: ResourceInfo,
    available: AtomicBool,
    failing: AtomicBool,
    exclusive_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    next_request: AtomicI32,
    parameters: Mutex<String>,
}

impl DeviceState {
    fn new(info: ResourceInfo) -> Self {
        Self {
            info,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            exclusive_open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            next_request: AtomicI32::new(1),
            parameters: Mutex::new(DEFAULT_PARAMETERS.to_string()),
        }
    }
}

/// In-process stand-in for a camera HAL.
pub struct SimulatedDriver {
    devices: Vec<Arc<DeviceState>>,
    events: Arc<Mutex<Option<EventSender>>>,
}

impl SimulatedDriver {
    pub fn new(infos: Vec<ResourceInfo>) -> Self {
        Self {
            devices: infos
                .into_iter()
                .map(|info| Arc::new(DeviceState::new(info)))
                .collect(),
            events: Arc::new(Mutex::new(None)),
        }
    }

    /// Two devices: back at 90 degrees and front at 270 degrees.
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            ResourceInfo::new(ResourceId::new(0), Facing::Back, 90),
            ResourceInfo::new(ResourceId::new(1), Facing::Front, 270),
        ])
    }

    fn device(&self, id: ResourceId) -> Result<&Arc<DeviceState>, HalError> {
        self.devices.get(id.index()).ok_or(HalError::NotPresent(id))
    }

    /// Starts the HAL event thread. Events raised by sessions are handed to
    /// `sink` on that thread. Replaces any previous sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn attach_event_sink(&self, sink: EventSink) -> std::io::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ResourceId, DeviceEvent)>();
        std::thread::Builder::new()
            .name("camd-hal-events".to_string())
            .spawn(move || {
                while let Some((resource, event)) = rx.blocking_recv() {
                    sink(resource, event);
                }
                debug!("HAL event thread stopped");
            })?;
        *self.events.lock() = Some(tx);
        Ok(())
    }

    /// Stops forwarding events. The event thread exits once drained.
    pub fn detach_event_sink(&self) {
        self.events.lock().take();
    }

    /// Raises an event as if the hardware had produced it.
    pub fn raise(&self, resource: ResourceId, event: DeviceEvent) {
        emit(&self.events, resource, event);
    }

    /// Makes a device (dis)appear. Opening an unavailable device fails.
    pub fn set_available(&self, id: ResourceId, available: bool) {
        if let Ok(device) = self.device(id) {
            device.available.store(available, Ordering::SeqCst);
        }
    }

    /// Makes every command on a device fail with an I/O error.
    pub fn set_failing(&self, id: ResourceId, failing: bool) {
        if let Ok(device) = self.device(id) {
            device.failing.store(failing, Ordering::SeqCst);
        }
    }

    pub fn open_count(&self, id: ResourceId) -> usize {
        self.device(id)
            .map(|d| d.opens.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn close_count(&self, id: ResourceId) -> usize {
        self.device(id)
            .map(|d| d.closes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self, id: ResourceId) -> usize {
        self.open_count(id).saturating_sub(self.close_count(id))
    }
}

impl HardwareDriver for SimulatedDriver {
    fn resource_count(&self) -> usize {
        self.devices.len()
    }

    fn describe(&self, id: ResourceId) -> Result<ResourceInfo, HalError> {
        self.device(id).map(|d| d.info.clone())
    }

    fn open(&self, id: ResourceId, mode: AccessMode) -> Result<Box<dyn DeviceSession>, HalError> {
        let device = self.device(id)?;
        if !device.available.load(Ordering::SeqCst) {
            return Err(HalError::NotPresent(id));
        }
        if mode == AccessMode::Exclusive && device.exclusive_open.swap(true, Ordering::SeqCst) {
            return Err(HalError::Busy(id));
        }

        device.opens.fetch_add(1, Ordering::SeqCst);
        debug!(resource = %id, mode = %mode, "Simulated device opened");
        Ok(Box::new(SimulatedSession {
            device: Arc::clone(device),
            mode,
            events: Arc::clone(&self.events),
        }))
    }
}

impl std::fmt::Debug for SimulatedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDriver")
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

fn emit(events: &Mutex<Option<EventSender>>, resource: ResourceId, event: DeviceEvent) {
    match events.lock().as_ref() {
        Some(tx) => {
            if tx.send((resource, event)).is_err() {
                warn!(resource = %resource, "HAL event thread gone, event dropped");
            }
        }
        None => trace!(resource = %resource, "No event sink attached"),
    }
}

struct SimulatedSession {
    device: Arc<DeviceState>,
    mode: AccessMode,
    events: Arc<Mutex<Option<EventSender>>>,
}

impl DeviceSession for SimulatedSession {
    fn execute(&mut self, command: &DeviceCommand) -> Result<DeviceReply, HalError> {
        let resource = self.device.info.id;
        if self.device.failing.load(Ordering::SeqCst) {
            return Err(HalError::Io(format!("{} failed on {resource}", command.name())));
        }

        let reply = match command {
            DeviceCommand::TakePicture => {
                emit(&self.events, resource, DeviceEvent::Shutter);
                DeviceReply::Done
            }
            DeviceCommand::AutoFocus => {
                emit(&self.events, resource, DeviceEvent::Focus { success: true });
                DeviceReply::Done
            }
            DeviceCommand::SetParameters { params } => {
                if params.is_empty() {
                    return Err(HalError::InvalidArgument("empty parameters".to_string()));
                }
                *self.device.parameters.lock() = params.clone();
                DeviceReply::Done
            }
            DeviceCommand::GetParameters => DeviceReply::Parameters {
                params: self.device.parameters.lock().clone(),
            },
            DeviceCommand::SubmitRequest { .. } => {
                let request_id = self.device.next_request.fetch_add(1, Ordering::SeqCst);
                emit(
                    &self.events,
                    resource,
                    DeviceEvent::RequestCompleted { request_id },
                );
                DeviceReply::RequestId { request_id }
            }
            _ => DeviceReply::Done,
        };
        trace!(resource = %resource, command = command.name(), "Simulated command executed");
        Ok(reply)
    }

    fn close(self: Box<Self>) {
        if self.mode == AccessMode::Exclusive {
            self.device.exclusive_open.store(false, Ordering::SeqCst);
        }
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        debug!(resource = %self.device.info.id, mode = %self.mode, "Simulated device closed");
    }
}
