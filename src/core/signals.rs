//! Named signal monitor
//!
//! Watches a handful of individually addressed input bits (axis selector,
//! jog multiplier, ...) in incoming status frames. Purely read-only: it
//! never touches routing or latch state.

use crate::core::protocol::address::{resolve, SignalAddress};
use crate::core::protocol::frame::read_signal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Default axis selector names
pub const AXIS_SIGNALS: &[&str] = &["X", "Y", "Z", "4", "5"];

/// Default multiplier selector names
pub const MULTIPLIER_SIGNALS: &[&str] = &["x1", "x10", "x100"];

/// Signal configuration errors
#[derive(Error, Debug)]
pub enum SignalConfigError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON that is not a signal configuration
    #[error("Unrecognized signal configuration: {0}")]
    Format(String),
}

/// One monitored bit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedSignal {
    /// Display name
    pub name: String,
    /// Address string, see [`crate::core::protocol::address`]
    #[serde(default)]
    pub address: String,
    /// Monitored at all
    #[serde(default)]
    pub enabled: bool,
}

impl NamedSignal {
    /// Unassigned, disabled signal
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: String::new(),
            enabled: false,
        }
    }

    /// Builder: assign an address and enable
    #[must_use]
    pub fn at(mut self, address: &str) -> Self {
        self.address = address.trim().to_string();
        self.enabled = true;
        self
    }
}

/// Ordered set of mutually exclusive selector signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalGroup {
    /// Group name
    pub name: String,
    /// Signals in priority order
    #[serde(default)]
    pub signals: Vec<NamedSignal>,
}

impl SignalGroup {
    /// Group with unassigned signals
    pub fn new(name: &str, signals: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            signals: signals.iter().map(|s| NamedSignal::new(s)).collect(),
        }
    }

    /// Signal by name
    pub fn signal_mut(&mut self, name: &str) -> Option<&mut NamedSignal> {
        self.signals.iter_mut().find(|s| s.name == name)
    }
}

/// All monitored groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalConfig {
    /// Groups in display order
    pub groups: Vec<SignalGroup>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            groups: vec![
                SignalGroup::new("axis", AXIS_SIGNALS),
                SignalGroup::new("multiplier", MULTIPLIER_SIGNALS),
            ],
        }
    }
}

impl SignalConfig {
    /// Group by name
    pub fn group_mut(&mut self, name: &str) -> Option<&mut SignalGroup> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    /// Disable and clear every signal
    pub fn reset(&mut self) {
        for signal in self.groups.iter_mut().flat_map(|g| g.signals.iter_mut()) {
            signal.address.clear();
            signal.enabled = false;
        }
    }

    /// Import the status window's JSON file
    ///
    /// Accepts `{"axis_signals": {...}, "multiplier_signals": {...}}` and
    /// the older form where axis names sit at the top level. A signal may
    /// be a bare address string (imported disabled) or
    /// `{"address": .., "enabled": ..}`.
    pub fn from_legacy_json(json: &str) -> Result<Self, SignalConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let root = value
            .as_object()
            .ok_or_else(|| SignalConfigError::Format("expected a JSON object".to_string()))?;

        let mut config = Self::default();
        match (root.get("axis_signals"), root.get("multiplier_signals")) {
            (Some(axis), Some(multiplier)) => {
                import_group(&mut config, "axis", axis);
                import_group(&mut config, "multiplier", multiplier);
            }
            _ => import_group(&mut config, "axis", &value),
        }
        Ok(config)
    }

    /// Parse a native or legacy configuration
    ///
    /// An object with a `groups` key is native and must parse as such;
    /// anything else goes through [`Self::from_legacy_json`].
    pub fn from_json(json: &str) -> Result<Self, SignalConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("groups").is_some() {
            Ok(serde_json::from_value(value)?)
        } else {
            Self::from_legacy_json(json)
        }
    }

    /// Load a signal configuration file, native or legacy JSON
    pub fn load(path: &Path) -> Result<Self, SignalConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        tracing::info!("Loaded signal configuration from {}", path.display());
        Ok(config)
    }

    /// Save as JSON
    pub fn save(&self, path: &Path) -> Result<(), SignalConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn import_group(config: &mut SignalConfig, group: &str, value: &serde_json::Value) {
    let (Some(group), Some(map)) = (config.group_mut(group), value.as_object()) else {
        return;
    };
    for signal in &mut group.signals {
        let Some(entry) = map.get(&signal.name) else {
            continue;
        };
        if let Some(address) = entry.as_str() {
            signal.address = address.trim().to_string();
            signal.enabled = false;
        } else if let Some(obj) = entry.as_object() {
            signal.address = obj
                .get("address")
                .and_then(|a| a.as_str())
                .unwrap_or_default()
                .trim()
                .to_string();
            signal.enabled = obj.get("enabled").and_then(|e| e.as_bool()).unwrap_or(false);
        }
    }
}

/// Value of one signal in a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalReading {
    /// Signal name
    pub name: String,
    /// Resolved address, if configured and valid
    pub address: Option<SignalAddress>,
    /// Bit value (0 when disabled or unresolvable)
    pub value: bool,
}

/// Values of one group in a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReading {
    /// Group name
    pub group: String,
    /// Per-signal values
    pub signals: Vec<SignalReading>,
    /// First active signal in group order
    pub selected: Option<String>,
}

/// Evaluates a [`SignalConfig`] against frames
///
/// Addresses are resolved once when the monitor is built.
#[derive(Debug, Clone)]
pub struct SignalMonitor {
    groups: Vec<(String, Vec<(String, Option<SignalAddress>)>)>,
}

impl SignalMonitor {
    /// Resolve every enabled signal's address
    pub fn new(config: &SignalConfig) -> Self {
        let mut reported = HashSet::new();
        let groups = config
            .groups
            .iter()
            .map(|group| {
                let signals = group
                    .signals
                    .iter()
                    .map(|signal| {
                        let address = if signal.enabled && !signal.address.is_empty() {
                            match resolve(&signal.address) {
                                Ok(address) => Some(address),
                                Err(e) => {
                                    if reported.insert(signal.address.clone()) {
                                        let name = &signal.name;
                                        tracing::warn!("Signal {}/{}: {}", group.name, name, e);
                                    }
                                    None
                                }
                            }
                        } else {
                            None
                        };
                        (signal.name.clone(), address)
                    })
                    .collect();
                (group.name.clone(), signals)
            })
            .collect();
        Self { groups }
    }

    /// Read every group out of a raw status frame
    pub fn evaluate(&self, frame: &[u8]) -> Vec<GroupReading> {
        self.groups
            .iter()
            .map(|(group, signals)| {
                let signals: Vec<SignalReading> = signals
                    .iter()
                    .map(|(name, address)| SignalReading {
                        name: name.clone(),
                        address: *address,
                        value: address.map_or(false, |a| read_signal(frame, a)),
                    })
                    .collect();
                let selected = signals.iter().find(|s| s.value).map(|s| s.name.clone());
                GroupReading {
                    group: group.clone(),
                    signals,
                    selected,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::INBOUND_MIN_LEN;

    fn frame(d0: u8, d8: u8) -> Vec<u8> {
        let mut raw = vec![0u8; INBOUND_MIN_LEN];
        raw[0] = 0x5A;
        raw[1] = d0;
        raw[9] = d8;
        raw
    }

    #[test]
    fn test_selected_is_first_active() {
        let mut config = SignalConfig::default();
        let axis = config.group_mut("axis").unwrap();
        *axis.signal_mut("X").unwrap() = NamedSignal::new("X").at("I0.0");
        *axis.signal_mut("Y").unwrap() = NamedSignal::new("Y").at("I0.1");
        *axis.signal_mut("Z").unwrap() = NamedSignal::new("Z").at("I71");

        let monitor = SignalMonitor::new(&config);
        let readings = monitor.evaluate(&frame(0b0000_0010, 0b0000_0001));
        let axis = &readings[0];
        assert_eq!(axis.group, "axis");
        assert!(!axis.signals[0].value);
        assert!(axis.signals[1].value);
        assert!(axis.signals[2].value);
        assert_eq!(axis.selected.as_deref(), Some("Y"));

        let multiplier = &readings[1];
        assert_eq!(multiplier.selected, None);
    }

    #[test]
    fn test_disabled_and_malformed_read_zero() {
        let mut config = SignalConfig::default();
        let axis = config.group_mut("axis").unwrap();
        axis.signal_mut("X").unwrap().address = "I0.0".to_string();
        *axis.signal_mut("Y").unwrap() = NamedSignal::new("Y").at("I0.9");

        let readings = SignalMonitor::new(&config).evaluate(&frame(0xFF, 0xFF));
        assert!(readings[0].signals.iter().all(|s| !s.value));
        assert_eq!(readings[0].selected, None);
    }

    #[test]
    fn test_short_frame_reads_zero() {
        let mut config = SignalConfig::default();
        let axis = config.group_mut("axis").unwrap();
        *axis.signal_mut("X").unwrap() = NamedSignal::new("X").at("I30.0");
        let readings = SignalMonitor::new(&config).evaluate(&frame(0xFF, 0xFF));
        assert!(!readings[0].signals[0].value);
    }

    #[test]
    fn test_legacy_import() {
        let json = r#"{
            "axis_signals": {
                "X": {"address": "i0.0", "enabled": true},
                "Y": {"address": "", "enabled": false}
            },
            "multiplier_signals": {"x10": {"address": "I71", "enabled": true}}
        }"#;
        let config = SignalConfig::from_legacy_json(json).unwrap();
        let axis = &config.groups[0];
        assert_eq!(axis.signals[0], NamedSignal::new("X").at("i0.0"));
        assert_eq!(axis.signals.len(), AXIS_SIGNALS.len());
        assert_eq!(config.groups[1].signals[1], NamedSignal::new("x10").at("I71"));

        let older = r#"{"X": "I2.0", "Z": {"address": "I5", "enabled": true}}"#;
        let config = SignalConfig::from_legacy_json(older).unwrap();
        assert_eq!(config.groups[0].signals[0].address, "I2.0");
        assert!(!config.groups[0].signals[0].enabled);
        assert!(config.groups[0].signals[2].enabled);

        assert!(SignalConfig::from_legacy_json("[1, 2]").is_err());
    }

    #[test]
    fn test_invalid_native_config_is_refused() {
        for json in [
            r#"{"groups": [{"name": "axis", "signals": [{"name": "X", "enabled": "yes"}]}]}"#,
            r#"{"groups": [], "version": 2}"#,
            r#"{"groups": [{"name": "axis", "signal": []}]}"#,
            r#"{"groups": {"axis": []}}"#,
        ] {
            assert!(
                matches!(SignalConfig::from_json(json), Err(SignalConfigError::Json(_))),
                "{json} should be refused"
            );
        }

        let legacy = r#"{"X": "I2.0"}"#;
        assert_eq!(SignalConfig::from_json(legacy).unwrap().groups[0].signals[0].address, "I2.0");
    }

    #[test]
    fn test_reset_and_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.json");

        let mut config = SignalConfig::default();
        *config.group_mut("multiplier").unwrap().signal_mut("x1").unwrap() =
            NamedSignal::new("x1").at("I3");
        config.save(&path).unwrap();
        assert_eq!(SignalConfig::load(&path).unwrap(), config);

        config.reset();
        assert_eq!(config, SignalConfig::default());
    }
}
