//! Explorer configuration management

use anyhow::{Context, Result, anyhow};
use driver::ClaimPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default)]
    pub explorer: ExplorerSettings,
    /// HID classification settings
    #[serde(default)]
    pub hid: HidSettings,
    /// Interrupt streaming settings
    #[serde(default)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "ExplorerSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl ExplorerSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidSettings {
    /// Interface class searched by the `find` subcommand
    #[serde(default = "HidSettings::default_interface_class")]
    pub interface_class: u8,
    /// Whether the usage probe requires a claim before reading the report
    /// descriptor (best-effort or require)
    #[serde(default)]
    pub claim_policy: ClaimPolicy,
}

impl Default for HidSettings {
    fn default() -> Self {
        Self {
            interface_class: Self::default_interface_class(),
            claim_policy: ClaimPolicy::default(),
        }
    }
}

impl HidSettings {
    fn default_interface_class() -> u8 {
        0x03 // HID
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Event channel capacity of a streaming session
    #[serde(default = "StreamSettings::default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            event_buffer: Self::default_event_buffer(),
        }
    }
}

impl StreamSettings {
    fn default_event_buffer() -> usize {
        64
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            explorer: ExplorerSettings::default(),
            hid: HidSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl ExplorerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let default = Self::default_path();
            if !default.exists() {
                return Err(anyhow!("No configuration file found, using defaults"));
            }
            default
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ExplorerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Falling back to default config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-explorer").join("config.toml")
        } else {
            PathBuf::from(".config/usb-explorer/config.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.explorer.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.explorer.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.stream.event_buffer == 0 {
            return Err(anyhow!("stream.event_buffer must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExplorerConfig::default();
        assert_eq!(config.explorer.log_level, "info");
        assert_eq!(config.hid.interface_class, 0x03);
        assert_eq!(config.hid.claim_policy, ClaimPolicy::BestEffort);
        assert_eq!(config.stream.event_buffer, 64);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ExplorerConfig = toml::from_str(
            r#"
            [hid]
            claim_policy = "require"
            "#,
        )
        .unwrap();

        assert_eq!(config.hid.claim_policy, ClaimPolicy::Require);
        assert_eq!(config.hid.interface_class, 0x03);
        assert_eq!(config.explorer.log_level, "info");
        assert_eq!(config.stream.event_buffer, 64);
    }

    #[test]
    fn test_config_serialization() {
        let config = ExplorerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ExplorerConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.explorer.log_level, parsed.explorer.log_level);
        assert_eq!(config.stream.event_buffer, parsed.stream.event_buffer);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ExplorerConfig::default();
        assert!(config.validate().is_ok());

        config.explorer.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.explorer.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ExplorerConfig::default();
        config.explorer.log_level = "debug".to_string();
        config.stream.event_buffer = 8;
        config.save(&path).unwrap();

        let loaded = ExplorerConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.explorer.log_level, "debug");
        assert_eq!(loaded.stream.event_buffer, 8);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[stream]\nevent_buffer = 0\n").unwrap();

        assert!(ExplorerConfig::load(Some(path)).is_err());
    }
}
