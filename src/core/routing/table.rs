//! Per-input-bit routing configuration

use crate::core::protocol::frame::IO_BITS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Routing error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Bit index outside 0..191
    #[error("Routing index out of range: {index} (valid: 0..{IO_BITS})")]
    IndexOutOfRange {
        /// Offending index
        index: u64,
    },

    /// Document field that is neither a number nor a numeric string
    #[error("Invalid routing value for key '{key}': {value}")]
    InvalidValue {
        /// Key the value was stored under
        key: String,
        /// Raw value
        value: String,
    },
}

/// Routing document I/O errors
#[derive(Error, Debug)]
pub enum RoutingFileError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document content rejected
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Check a bit index from the outside world
pub fn check_index(index: usize) -> Result<u8, RoutingError> {
    if index < IO_BITS {
        Ok(index as u8)
    } else {
        Err(RoutingError::IndexOutOfRange { index: index as u64 })
    }
}

/// Routing of one input bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingEntry {
    /// Source input bit (also the entry's position in the table)
    pub input_bit: u8,
    /// Target output bit
    pub output_bit: u8,
    /// Contributes to the output frame
    pub enabled: bool,
    /// Toggle on rising edges instead of following the input level
    pub latch: bool,
}

impl RoutingEntry {
    /// Identity, disabled, non-latching
    pub fn identity(input_bit: u8) -> Self {
        Self {
            input_bit,
            output_bit: input_bit,
            enabled: false,
            latch: false,
        }
    }
}

/// The 192-entry routing table
///
/// Keeps a derived list of enabled inputs in ascending order so frame
/// processing only visits entries that contribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    entries: [RoutingEntry; IO_BITS],
    active: Vec<u8>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    /// All entries identity-mapped and disabled
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|i| RoutingEntry::identity(i as u8)),
            active: Vec::new(),
        }
    }

    /// Entry for `input_bit`
    pub fn entry(&self, input_bit: usize) -> Result<&RoutingEntry, RoutingError> {
        let index = check_index(input_bit)?;
        Ok(&self.entries[usize::from(index)])
    }

    /// All entries in input order
    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Enabled entries in ascending input order
    pub fn active_entries(&self) -> impl Iterator<Item = &RoutingEntry> + '_ {
        self.active.iter().map(|&i| &self.entries[usize::from(i)])
    }

    /// Number of enabled entries
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Route `input_bit` to `output_bit`
    pub fn set_output(&mut self, input_bit: usize, output_bit: usize) -> Result<(), RoutingError> {
        let input = check_index(input_bit)?;
        let output = check_index(output_bit)?;
        self.entries[usize::from(input)].output_bit = output;
        Ok(())
    }

    /// Enable or disable `input_bit`
    pub fn set_enabled(&mut self, input_bit: usize, enabled: bool) -> Result<(), RoutingError> {
        let input = check_index(input_bit)?;
        self.entries[usize::from(input)].enabled = enabled;
        self.rebuild_active();
        Ok(())
    }

    /// Switch latch mode of `input_bit`
    ///
    /// Returns `true` when latch mode went from off to on; the owner of the
    /// latch store must then reset that bit.
    pub fn set_latch(&mut self, input_bit: usize, latch: bool) -> Result<bool, RoutingError> {
        let input = check_index(input_bit)?;
        let entry = &mut self.entries[usize::from(input)];
        let switched_on = latch && !entry.latch;
        entry.latch = latch;
        Ok(switched_on)
    }

    /// Inputs whose latch flag is set here but not in `previous`
    pub fn latches_enabled_since(&self, previous: &RoutingTable) -> Vec<u8> {
        self.entries
            .iter()
            .zip(previous.entries.iter())
            .filter(|(now, before)| now.latch && !before.latch)
            .map(|(now, _)| now.input_bit)
            .collect()
    }

    fn rebuild_active(&mut self) {
        self.active = self
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.input_bit)
            .collect();
    }

    // ============ Persistence ============

    /// Convert to the persisted document (all 192 entries)
    pub fn to_document(&self) -> RoutingDocument {
        RoutingDocument {
            entries: self
                .entries
                .iter()
                .map(|e| EntryRecord {
                    input: u64::from(e.input_bit),
                    output: Some(u64::from(e.output_bit)),
                    enabled: e.enabled,
                    latch: e.latch,
                })
                .collect(),
        }
    }

    /// Build a table from a document, defaulting whatever it leaves out
    pub fn from_document(doc: &RoutingDocument) -> Result<Self, RoutingError> {
        let mut table = Self::new();
        for record in &doc.entries {
            let input = check_u64(record.input)?;
            let output = match record.output {
                Some(output) => check_u64(output)?,
                None => input,
            };
            table.entries[usize::from(input)] = RoutingEntry {
                input_bit: input,
                output_bit: output,
                enabled: record.enabled,
                latch: record.latch,
            };
        }
        table.rebuild_active();
        Ok(table)
    }

    /// Parse a JSON routing document in either the current or legacy shape
    ///
    /// The shape is picked by its keys: any of `mapping`, `enabled` or
    /// `latch` without `entries` is the legacy form, everything else must
    /// be a valid current document.
    pub fn from_json(json: &str) -> Result<Self, RoutingFileError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let Some(object) = value.as_object() else {
            return Err(RoutingFileError::Json(serde::de::Error::custom(
                "routing document must be a JSON object",
            )));
        };

        let legacy = !object.contains_key("entries")
            && LEGACY_KEYS.iter().any(|key| object.contains_key(*key));
        let doc = if legacy {
            serde_json::from_value::<LegacyDocument>(value)?.into_document()?
        } else {
            serde_json::from_value::<RoutingDocument>(value)?
        };
        Ok(Self::from_document(&doc)?)
    }

    /// Serialize to pretty JSON (current shape)
    pub fn to_json(&self) -> Result<String, RoutingFileError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// Load a routing document from disk
    pub fn load(path: &Path) -> Result<Self, RoutingFileError> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_json(&content)?;
        tracing::info!(
            "Loaded routing table from {} ({} enabled)",
            path.display(),
            table.active_count()
        );
        Ok(table)
    }

    /// Save the routing document to disk
    pub fn save(&self, path: &Path) -> Result<(), RoutingFileError> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!("Saved routing table to {}", path.display());
        Ok(())
    }
}

fn check_u64(index: u64) -> Result<u8, RoutingError> {
    usize::try_from(index)
        .map_err(|_| RoutingError::IndexOutOfRange { index })
        .and_then(check_index)
}

/// Persisted form of one routing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryRecord {
    /// Input bit
    pub input: u64,
    /// Output bit, defaults to `input`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    /// Enabled flag
    #[serde(default)]
    pub enabled: bool,
    /// Latch flag
    #[serde(default)]
    pub latch: bool,
}

impl EntryRecord {
    /// Record that only names its input
    pub fn new(input: u64) -> Self {
        Self {
            input,
            output: None,
            enabled: false,
            latch: false,
        }
    }
}

/// Persisted routing table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingDocument {
    /// Entries, any subset and any order
    #[serde(default)]
    pub entries: Vec<EntryRecord>,
}

/// A number that may have been written as a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Int(u64),
    Str(String),
}

impl LooseNumber {
    fn resolve(&self, key: &str) -> Result<u64, RoutingError> {
        match self {
            LooseNumber::Int(n) => Ok(*n),
            LooseNumber::Str(s) => s.trim().parse().map_err(|_| RoutingError::InvalidValue {
                key: key.to_string(),
                value: s.clone(),
            }),
        }
    }
}

fn parse_key(key: &str) -> Result<u64, RoutingError> {
    key.trim().parse().map_err(|_| RoutingError::InvalidValue {
        key: key.to_string(),
        value: key.to_string(),
    })
}

const LEGACY_KEYS: [&str; 3] = ["mapping", "enabled", "latch"];

/// Legacy document: three maps keyed by stringified input bit
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyDocument {
    #[serde(default)]
    mapping: BTreeMap<String, LooseNumber>,
    #[serde(default)]
    enabled: BTreeMap<String, bool>,
    #[serde(default)]
    latch: BTreeMap<String, bool>,
}

impl LegacyDocument {
    fn into_document(self) -> Result<RoutingDocument, RoutingError> {
        let mut records: BTreeMap<u64, EntryRecord> = BTreeMap::new();

        for (key, output) in &self.mapping {
            let input = parse_key(key)?;
            let output = output.resolve(key)?;
            records.entry(input).or_insert_with(|| EntryRecord::new(input)).output = Some(output);
        }
        for (key, &enabled) in &self.enabled {
            let input = parse_key(key)?;
            records.entry(input).or_insert_with(|| EntryRecord::new(input)).enabled = enabled;
        }
        for (key, &latch) in &self.latch {
            let input = parse_key(key)?;
            records.entry(input).or_insert_with(|| EntryRecord::new(input)).latch = latch;
        }

        Ok(RoutingDocument {
            entries: records.into_values().collect(),
        })
    }
}
