//! camd Core - Shared types for camera resource arbitration
//!
//! This crate provides the domain types and collaborator contracts shared
//! between the daemon (`camd`), the wire protocol and the control client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod caller;
pub mod error;
pub mod hal;
pub mod remote;
pub mod resource;
pub mod sound;

// Re-exports for convenience
pub use caller::{CallerIdentity, CallerRef, ClientId, RemoteHandle};
pub use error::{ArbiterError, ArbiterResult, DeathError, DomainError, HalError, SoundError};
pub use hal::{
    AccessMode, DeviceCommand, DeviceEvent, DeviceReply, DeviceSession, HardwareDriver, LockStatus,
};
pub use remote::{ClientCallbacks, DeathNotifier, DeathRecipient, NoopCallbacks, SubscriptionId};
pub use resource::{Facing, ResourceId, ResourceInfo, MAX_RESOURCES};
pub use sound::{SoundHandle, SoundKind, SoundLoader};
