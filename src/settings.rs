use crate::errors::{MonitorError, Result};
use directories::ProjectDirs;
use duplex_audio::DriverConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

/// Persisted monitor preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Display name of the last pairing that loaded successfully
    pub device: Option<String>,
    /// How long a monitoring run lasts
    pub run_seconds: u64,
    pub driver: DriverConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            device: None,
            run_seconds: 5,
            driver: DriverConfig::default(),
        }
    }
}

impl MonitorSettings {
    /// `<config dir>/duplex-monitor/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        ProjectDirs::from("", "", "duplex-monitor")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .ok_or(MonitorError::NoConfigDir)
    }

    /// Load settings, falling back to defaults when the file does not exist yet
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: MonitorSettings =
            serde_json::from_str(r#"{ "device": "in: Mic/out: Speakers" }"#).unwrap();
        assert_eq!(settings.device.as_deref(), Some("in: Mic/out: Speakers"));
        assert_eq!(settings.run_seconds, 5);
        assert_eq!(settings.driver, DriverConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("duplex-monitor-test-{}", std::process::id()));
        let path = dir.join(SETTINGS_FILE);

        let mut settings = MonitorSettings::default();
        settings.device = Some("System Default In/Out Devices".to_string());
        settings.driver.preferred_buffer_frames = 128;
        settings.save(&path).unwrap();

        assert_eq!(MonitorSettings::load(&path).unwrap(), settings);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("duplex-monitor-does-not-exist.json");
        assert_eq!(MonitorSettings::load(&path).unwrap(), MonitorSettings::default());
    }
}
