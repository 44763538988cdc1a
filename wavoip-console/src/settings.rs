//! Console settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use wavoip_core::protocol::DeviceStatus;
use wavoip_core::SessionConfig;
use wavoip_sim::{SimDeviceConfig, SimMediaConfig, StartBehavior};

/// A simulated device to register on startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    /// Device token
    pub token: String,
    /// Behaviour of the simulated endpoint
    #[serde(flatten)]
    pub sim: SimDeviceConfig,
}

/// Console settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Number to dial
    pub number: String,
    /// Devices, in dispatch order
    pub devices: Vec<DeviceEntry>,
    pub session: SessionConfig,
    pub media: SimMediaConfig,
    /// How long to wait for the peer to answer (ms)
    pub answer_timeout_ms: u64,
    /// How long to hold an answered call before hanging up (ms)
    pub hold_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            number: "5511999999999".to_string(),
            devices: vec![
                DeviceEntry {
                    token: "device-busy".to_string(),
                    sim: SimDeviceConfig::default().with_start(StartBehavior::Busy),
                },
                DeviceEntry {
                    token: "device-sleepy".to_string(),
                    sim: SimDeviceConfig::default()
                        .with_status(DeviceStatus::Hibernating)
                        .answering_after(800),
                },
                DeviceEntry {
                    token: "device-spare".to_string(),
                    sim: SimDeviceConfig::default().answering_after(500),
                },
            ],
            session: SessionConfig::default(),
            media: SimMediaConfig::default(),
            answer_timeout_ms: 5_000,
            hold_ms: 1_500,
        }
    }
}

impl Settings {
    /// Config directory for wavoip
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("wavoip"))
    }

    /// Default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).context("Failed to write settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "number": "5521",
                "devices": [
                    { "token": "a", "status": "hibernating" },
                    { "token": "b", "start": { "kind": "silent" } }
                ],
                "session": { "ack_timeout_ms": 500 }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.number, "5521");
        assert_eq!(settings.devices[0].sim.status, DeviceStatus::Hibernating);
        assert_eq!(settings.devices[1].sim.start, StartBehavior::Silent);
        assert_eq!(settings.devices[1].sim.status, DeviceStatus::Open);
        assert_eq!(settings.session.ack_timeout_ms, 500);
        assert_eq!(settings.session.request_buffer, 32);
        assert_eq!(settings.hold_ms, 1_500);
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("wavoip-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = Settings::default();

        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Settings::load_from(Path::new("/nonexistent/wavoip.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read settings"));
    }
}
