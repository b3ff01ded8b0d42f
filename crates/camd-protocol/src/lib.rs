//! camd Protocol - Wire protocol for daemon communication
//!
//! This crate provides the message types exchanged between control clients
//! and the `camd` daemon over its Unix socket. Messages are newline-delimited
//! JSON objects tagged by `type`.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
