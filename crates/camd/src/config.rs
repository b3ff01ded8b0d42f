//! Daemon configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields a daemon with two simulated devices.
//!
//! ```toml
//! socket_path = "/run/camd.sock"
//!
//! [[devices]]
//! facing = "back"
//! orientation = 90
//!
//! [[devices]]
//! facing = "front"
//! orientation = 270
//!
//! [access]
//! allowed_uids = [1000]
//!
//! [sounds]
//! shutter = "/usr/share/camd/sounds/camera_click.ogg"
//! recording = "/usr/share/camd/sounds/video_record.ogg"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use camd_core::{Facing, ResourceId, ResourceInfo, MAX_RESOURCES};

use crate::access::AccessPolicy;
use crate::server::DEFAULT_SOCKET_PATH;

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "CAMD_SOCKET";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CAMD_CONFIG";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub facing: Facing,

    /// Mounting orientation in degrees.
    #[serde(default)]
    pub orientation: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Uids allowed to connect. Empty admits everyone.
    #[serde(default)]
    pub allowed_uids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundConfig {
    #[serde(default = "default_shutter_sound")]
    pub shutter: PathBuf,

    #[serde(default = "default_recording_sound")]
    pub recording: PathBuf,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            shutter: default_shutter_sound(),
            recording: default_recording_sound(),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub access: AccessConfig,

    #[serde(default)]
    pub sounds: SoundConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            facing: Facing::Back,
            orientation: 90,
        },
        DeviceConfig {
            facing: Facing::Front,
            orientation: 270,
        },
    ]
}

fn default_shutter_sound() -> PathBuf {
    PathBuf::from("/usr/share/camd/sounds/camera_click.ogg")
}

fn default_recording_sound() -> PathBuf {
    PathBuf::from("/usr/share/camd/sounds/video_record.ogg")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            devices: default_devices(),
            access: AccessConfig::default(),
            sounds: SoundConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Default config file location: `<config dir>/camd/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camd").join("config.toml"))
    }

    /// Parses and validates a config file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Read` if the file cannot be read
    /// - `ConfigError::Parse` if it is not valid TOML for this schema
    /// - `ConfigError::Invalid` if validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), devices = config.devices.len(), "Config loaded");
        Ok(config)
    }

    /// Parses and validates config text.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Parse` if it is not valid TOML for this schema
    /// - `ConfigError::Invalid` if validation fails
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the config the daemon should run with.
    ///
    /// Order: explicit path, then `CAMD_CONFIG`, then the default location
    /// if it exists, then built-in defaults. `CAMD_SOCKET` overrides the
    /// socket path in every case.
    ///
    /// # Errors
    ///
    /// Propagates load errors for an explicitly named file.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load(path)?,
                None => Self::default(),
            },
        };

        if let Some(socket) = std::env::var_os(SOCKET_ENV) {
            config.socket_path = PathBuf::from(socket);
        }
        Ok(config)
    }

    /// # Errors
    ///
    /// - `ConfigError::Invalid` if there are no devices, an orientation is
    ///   not a multiple of 90 below 360, or the socket path is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one device is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .devices
            .iter()
            .find(|d| d.orientation % 90 != 0 || d.orientation >= 360)
        {
            return Err(ConfigError::Invalid(format!(
                "orientation {} is not one of 0, 90, 180, 270",
                bad.orientation
            )));
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket_path is empty".to_string()));
        }
        if self.devices.len() > MAX_RESOURCES {
            tracing::warn!(
                devices = self.devices.len(),
                max = MAX_RESOURCES,
                "More devices configured than can be arbitrated"
            );
        }
        Ok(())
    }

    /// Device descriptors, with ids assigned in file order.
    pub fn resource_infos(&self) -> Vec<ResourceInfo> {
        self.devices
            .iter()
            .zip(0u32..)
            .map(|(device, id)| ResourceInfo::new(ResourceId::new(id), device.facing, device.orientation))
            .collect()
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::with_allowed_uids(self.access.allowed_uids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_parse_full_config() {
        let config = DaemonConfig::parse(
            r#"
            socket_path = "/run/camd.sock"

            [[devices]]
            facing = "external"
            orientation = 0

            [access]
            allowed_uids = [1000, 1001]

            [sounds]
            shutter = "/tmp/click.ogg"
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/camd.sock"));
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices.first().map(|d| d.facing), Some(Facing::External));
        assert_eq!(config.access.allowed_uids, vec![1000, 1001]);
        assert_eq!(config.sounds.shutter, PathBuf::from("/tmp/click.ogg"));
        assert_eq!(config.sounds.recording, default_recording_sound());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            DaemonConfig::parse("devices = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DaemonConfig::parse("[[devices]]\norientation = 45"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DaemonConfig::parse("devices = 3"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_resource_infos_in_order() {
        let infos = DaemonConfig::default().resource_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos.first().map(|i| i.id), Some(ResourceId::new(0)));
        assert_eq!(infos.get(1).map(|i| i.facing), Some(Facing::Front));
        assert_eq!(infos.get(1).map(|i| i.orientation), Some(270));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "socket_path = \"/tmp/other.sock\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));

        let missing = DaemonConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
