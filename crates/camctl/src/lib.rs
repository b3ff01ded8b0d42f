//! camctl - Control client for the camd daemon
//!
//! This crate provides the async client used by the `camctl` binary:
//! - `client` - Handshake, requests, and event buffering over the socket
//! - `error` - Error types with the daemon's stable error codes
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` outside tests.

pub mod client;
pub mod error;

pub use client::{default_socket_path, ControlClient, HandleEvent, DEFAULT_SOCKET_PATH};
pub use error::{CtlError, Result};
