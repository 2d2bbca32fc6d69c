//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default tracing level, overridden by `RUST_LOG` and `--log-level`
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// libusb's own log verbosity, 0 (none) to 4 (debug)
    #[serde(default)]
    pub debug_level: i32,
    /// Transfer timeout in milliseconds, 0 waits forever
    #[serde(default = "UsbSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl UsbSettings {
    fn default_timeout_ms() -> u64 {
        1000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            debug_level: 0,
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl CliConfig {
    /// Load configuration from `path`, or from the standard locations
    ///
    /// A leading `~` in `path` is expanded.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/usbrc/cli.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

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

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbrc").join("cli.toml")
        } else {
            PathBuf::from(".config/usbrc/cli.toml")
        }
    }

    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if !(0..=4).contains(&self.usb.debug_level) {
            return Err(anyhow!(
                "Invalid USB debug level {}, must be between 0 and 4",
                self.usb.debug_level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.usb.debug_level, 0);
        assert_eq!(config.usb.timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CliConfig = toml::from_str("[usb]\ndebug_level = 3\n").unwrap();
        assert_eq!(config.usb.debug_level, 3);
        assert_eq!(config.usb.timeout_ms, 1000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = CliConfig::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level 'loud'"));
    }

    #[test]
    fn test_invalid_debug_level() {
        let mut config = CliConfig::default();
        config.usb.debug_level = 5;
        assert!(config.validate().is_err());
        config.usb.debug_level = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cli.toml");

        let mut config = CliConfig::default();
        config.logging.level = "debug".to_string();
        config.usb.timeout_ms = 250;
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(&path, "[usb]\ndebug_level = 9\n").unwrap();

        assert!(CliConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = CliConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
