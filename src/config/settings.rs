//! Application settings

use crate::core::protocol::checksum::CrcOrder;
use crate::core::protocol::frame::{INBOUND_MAX_LEN, INBOUND_MIN_LEN};
use crate::core::relay::RelayConfig;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unserializable settings
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Routing table file (defaults to `routing.json` in the config dir)
    pub routing_file: Option<PathBuf>,
    /// Signal monitor file (defaults to `signals.json` in the config dir)
    pub signals_file: Option<PathBuf>,
    /// Serial line to the controller
    pub serial: SerialConfig,
    /// Relay behavior
    pub relay: RelaySettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Path of the config file
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(super::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("config.toml"))
    }

    /// Load config from the config dir, defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Save config to the config dir
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.save_to(&path)
    }

    /// Load config from a file, defaults when absent
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            tracing::debug!("Loaded config from {}", path.display());
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Routing file in effect
    pub fn routing_path(&self) -> Option<PathBuf> {
        self.routing_file.clone().or_else(super::default_routing_file)
    }

    /// Signal file in effect
    pub fn signals_path(&self) -> Option<PathBuf> {
        self.signals_file.clone().or_else(super::default_signals_file)
    }
}

/// Relay behavior settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Bytes per status frame, kept within 25..=1024
    pub inbound_frame_len: usize,
    /// Answer every status frame
    pub auto_respond: bool,
    /// Resend the latest control frame every N ms
    pub repeat_interval_ms: Option<u64>,
    /// Checksum byte order on the wire
    pub crc_order: CrcOrder,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            inbound_frame_len: INBOUND_MIN_LEN,
            auto_respond: true,
            repeat_interval_ms: None,
            crc_order: CrcOrder::default(),
        }
    }
}

impl RelaySettings {
    /// Runtime configuration for a relay session
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            frame_len: self.inbound_frame_len.clamp(INBOUND_MIN_LEN, INBOUND_MAX_LEN),
            auto_respond: self.auto_respond,
            repeat_interval: self
                .repeat_interval_ms
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis),
            ..RelayConfig::default()
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Directory for `iorelay.log`, none for stderr only
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
