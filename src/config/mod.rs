//! Configuration module
//!
//! Handles application settings and their on-disk locations

mod settings;

pub use settings::{AppConfig, ConfigError, LoggingSettings, RelaySettings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "iorelay", "IoRelay").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default routing table location
pub fn default_routing_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("routing.json"))
}

/// Default signal configuration location
pub fn default_signals_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("signals.json"))
}
