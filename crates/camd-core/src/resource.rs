//! Resource identifiers and static descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// Upper bound on the number of resources the arbitrator tracks.
///
/// Drivers reporting more devices than this are capped at startup.
pub const MAX_RESOURCES: usize = 4;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Index of a physical resource slot.
///
/// Ids are dense: a driver with `n` devices exposes ids `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u32);

impl ResourceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the id as a slot index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Static Descriptors
// ============================================================================

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    Back,
    Front,
    External,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Back => "back",
            Self::Front => "front",
            Self::External => "external",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facing {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back" => Ok(Self::Back),
            "front" => Ok(Self::Front),
            "external" => Ok(Self::External),
            other => Err(DomainError::InvalidFieldValue {
                field: "facing".to_string(),
                value: other.to_string(),
                expected: "back, front or external".to_string(),
            }),
        }
    }
}

/// Immutable description of one resource slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub facing: Facing,
    /// Clockwise rotation of the sensor image, in degrees (0, 90, 180, 270).
    pub orientation: u16,
}

impl ResourceInfo {
    pub fn new(id: ResourceId, facing: Facing, orientation: u16) -> Self {
        Self {
            id,
            facing,
            orientation,
        }
    }
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource {} ({}, orientation {})",
            self.id, self.facing, self.orientation
        )
    }
}
