//! camd - Camera resource arbitrator and socket daemon
//!
//! This crate provides the arbitration core and the daemon around it:
//! - `arbiter` - Who may use which camera, and teardown when they go away
//! - `server` - Unix socket server, one remote per connection
//! - `hal` - Simulated hardware driver used by the daemon and tests
//! - `remote` - In-process death notifications for connection peers
//! - `sound` - Reference-counted shutter and recording sounds
//! - `access` - Caller permission policy
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       camd daemon                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│        Arbitrator           │   │
//! │  │ (Unix Socket)   │     │  (resource state owner)     │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ HAL sessions      │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│   HardwareDriver + events   │   │
//! │  │  (per remote)   │     │                             │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Teardown paths log and continue rather than fail

pub mod access;
pub mod arbiter;
pub mod config;
pub mod hal;
pub mod remote;
pub mod server;
pub mod sound;

pub use access::AccessPolicy;
pub use arbiter::{Arbitrator, Connection, ExclusiveClient, SharedClient};
pub use config::DaemonConfig;
pub use hal::SimulatedDriver;
pub use remote::LocalDeathNotifier;
pub use server::DaemonServer;
pub use sound::{FileSoundLoader, SoundManager};
