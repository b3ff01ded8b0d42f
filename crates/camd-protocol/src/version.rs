//! Protocol versioning for safe upgrades.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol version for client-daemon communication.
///
/// `major.minor`: a major bump breaks compatibility, a minor bump only adds
/// message variants that older peers never send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parses a version string like "1.0".
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidFormat(s.to_string());

        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u16>().map_err(|_| invalid())?;
        let minor = minor.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self { major, minor })
    }

    /// Returns true if peers speaking `self` and `other` can talk.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Checks a client's version against the one this daemon speaks.
    ///
    /// # Errors
    ///
    /// - `VersionError::Incompatible` if the major versions differ
    pub fn negotiate(&self, server: &ProtocolVersion) -> Result<(), VersionError> {
        if self.is_compatible_with(server) {
            Ok(())
        } else {
            Err(VersionError::Incompatible {
                got: self.to_string(),
                expected: server.to_string(),
            })
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),

    #[error("Incompatible version: got {got}, expected {expected}")]
    Incompatible { got: String, expected: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(ProtocolVersion::parse("1.0").unwrap(), ProtocolVersion::new(1, 0));
        assert_eq!(ProtocolVersion::parse("3.12").unwrap(), ProtocolVersion::new(3, 12));
        assert!(ProtocolVersion::parse("1").is_err());
        assert!(ProtocolVersion::parse("1.0.0").is_err());
        assert!(ProtocolVersion::parse("one.two").is_err());
    }

    #[test]
    fn test_negotiate() {
        let server = ProtocolVersion::new(1, 0);
        assert!(ProtocolVersion::new(1, 4).negotiate(&server).is_ok());

        let err = ProtocolVersion::new(2, 0).negotiate(&server).unwrap_err();
        assert_eq!(
            err,
            VersionError::Incompatible {
                got: "2.0".to_string(),
                expected: "1.0".to_string(),
            }
        );
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::new(1, 2).to_string(), "1.2");
    }
}
