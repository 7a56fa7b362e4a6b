// SPDX-License-Identifier: MIT
//
// Bridge configuration, persisted as TOML.
//
// The file is rewritten at runtime in exactly one situation: a successful
// registration stores the cloud-issued serial number (and the delete command
// clears it again), so `save` must round-trip everything it loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PolarlinkError, Result};

/// Persistent bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Cloud endpoint the persistent connection is made to.
    pub server_url: String,
    /// Account username (email) used for first-time registration.
    pub username: String,
    /// Account PIN used for first-time registration.
    pub pin: String,
    /// Cloud-issued serial number. `None` until the device registers.
    pub serial_number: Option<String>,
    /// Manufacturer code sent during registration.
    pub manufacturer: String,
    pub machine_type: String,
    pub printer_type: String,
    /// Raise log verbosity to debug.
    pub verbose: bool,
    /// Base URL of the local Moonraker API.
    pub moonraker_url: String,
    /// Seconds between periodic status reports while authenticated.
    pub status_interval_secs: u64,
    /// Byte budget for uploaded snapshots.
    pub max_image_size: usize,
    /// Where to look for a newer release. `None` disables the check.
    pub update_check_url: Option<String>,
    /// Shell command run when the cloud issues an update. `None` makes the
    /// update command a no-op beyond logging.
    pub update_hook: Option<String>,
    pub webcam: WebcamConfig,
    pub paths: PathsConfig,
}

/// Webcam capture and correction settings.
///
/// The three orientation fields are a *manual override*: when any of them is
/// set, frontend-reported camera settings are ignored entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebcamConfig {
    pub enabled: bool,
    pub flip_horizontal: Option<bool>,
    pub flip_vertical: Option<bool>,
    pub rotation: Option<i64>,
    /// Seconds between idle-channel snapshot uploads.
    pub idle_interval_secs: u64,
    /// Seconds between printing-channel snapshot uploads.
    pub printing_interval_secs: u64,
}

/// Filesystem locations used by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// PKCS#8 PEM device key, generated on first start.
    pub key_file: String,
    /// Operator-readable connection/auth status record.
    pub status_file: String,
    /// Subdirectory under the print host's G-code root for downloaded cloud
    /// files. Empty means the root itself.
    pub gcode_dir: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: "https://printer4.polar3d.com".into(),
            username: String::new(),
            pin: String::new(),
            serial_number: None,
            manufacturer: "kl".into(),
            machine_type: "Cartesian".into(),
            printer_type: "Cartesian".into(),
            verbose: false,
            moonraker_url: "http://localhost:7125".into(),
            status_interval_secs: 5,
            max_image_size: 150_000,
            update_check_url: Some(
                "https://api.github.com/repos/polarlink/polarlink/releases/latest".into(),
            ),
            update_hook: None,
            webcam: WebcamConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flip_horizontal: None,
            flip_vertical: None,
            rotation: None,
            idle_interval_secs: 60,
            printing_interval_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            key_file: "polarlink_key.pem".into(),
            status_file: "polarlink_status.json".into(),
            gcode_dir: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Load the configuration file, creating it with defaults if absent.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&raw)
                .map_err(|e| PolarlinkError::Config(format!("{}: {e}", path.display())))?;
            Ok(config)
        } else {
            // Callers may not have logging up yet, so first-run creation is
            // reported by the caller, not here.
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Write the configuration back to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| PolarlinkError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Username and PIN are both present, so registration can be attempted.
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.pin.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarlink.toml");

        let config = BridgeConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server_url, "https://printer4.polar3d.com");
        assert_eq!(config.status_interval_secs, 5);
        assert_eq!(config.max_image_size, 150_000);
        assert!(config.serial_number.is_none());
        assert!(!config.has_credentials());
    }

    #[test]
    fn serial_number_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarlink.toml");

        let mut config = BridgeConfig::load_or_create(&path).unwrap();
        config.serial_number = Some("ABC123".into());
        config.save(&path).unwrap();

        let reloaded = BridgeConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded.serial_number.as_deref(), Some("ABC123"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarlink.toml");
        std::fs::write(&path, "username = \"fleet@example.com\"\npin = \"1234\"\n").unwrap();

        let config = BridgeConfig::load_or_create(&path).unwrap();
        assert!(config.has_credentials());
        assert_eq!(config.moonraker_url, "http://localhost:7125");
        assert_eq!(config.webcam.idle_interval_secs, 60);
        assert_eq!(config.webcam.printing_interval_secs, 10);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarlink.toml");
        std::fs::write(&path, "server_url = [not toml").unwrap();

        let err = BridgeConfig::load_or_create(&path).unwrap_err();
        assert!(matches!(err, PolarlinkError::Config(_)));
    }
}
