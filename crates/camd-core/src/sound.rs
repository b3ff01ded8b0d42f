//! Notification sound contract.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SoundError;

/// The two notification sounds the service plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    Shutter,
    Recording,
}

impl SoundKind {
    pub const ALL: [SoundKind; 2] = [SoundKind::Shutter, SoundKind::Recording];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shutter => "shutter",
            Self::Recording => "recording",
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a loaded, playable sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(u64);

impl SoundHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Loads, plays and unloads notification sounds.
pub trait SoundLoader: Send + Sync {
    fn load(&self, kind: SoundKind) -> Result<SoundHandle, SoundError>;

    fn play(&self, handle: &SoundHandle);

    fn unload(&self, handle: SoundHandle);
}
