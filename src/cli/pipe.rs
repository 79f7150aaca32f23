//! CLI Pipe Support
//!
//! Hex frames in on stdin, formatted results out on stdout, for scripting
//! the routing engine without a device attached.

use crate::core::protocol::checksum::CrcOrder;
use crate::core::protocol::frame::OutboundFrame;
use crate::core::signals::GroupReading;
use std::io::{self, BufRead};

/// Output format for piped results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Space separated hex bytes
    #[default]
    Hex,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Parse a line of hex bytes
///
/// Accepts `5A 00 FF`, `5a00ff`, `0x5A,0x00,0xFF` and mixes of these.
pub fn parse_hex(line: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits: String = line
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();
    hex::decode(digits)
}

/// Space separated upper-case hex
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a control frame
pub fn format_frame(frame: &OutboundFrame, order: CrcOrder, format: OutputFormat) -> String {
    match format {
        OutputFormat::Hex => hex_string(frame.as_ref()),
        OutputFormat::Json => serde_json::json!({
            "frame": hex_string(frame.as_ref()),
            "data": hex_string(frame.data()),
            "crc": format!("0x{:04X}", frame.crc(order)),
            "length": frame.as_ref().len(),
        })
        .to_string(),
    }
}

/// Format a rejected input line
pub fn format_error(line: usize, message: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Hex => format!("line {line}: {message}"),
        OutputFormat::Json => serde_json::json!({ "line": line, "error": message }).to_string(),
    }
}

/// Format signal monitor readings
pub fn format_readings(readings: &[GroupReading], format: OutputFormat) -> String {
    match format {
        OutputFormat::Hex => readings
            .iter()
            .map(|group| {
                let bits: Vec<String> = group
                    .signals
                    .iter()
                    .map(|s| format!("{}={}", s.name, u8::from(s.value)))
                    .collect();
                format!(
                    "{}: {} -> {}",
                    group.group,
                    bits.join(" "),
                    group.selected.as_deref().unwrap_or("-")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => serde_json::to_string(readings).unwrap_or_default(),
    }
}

/// Non-blank, non-comment lines of hex input, numbered from 1
pub struct HexLines<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> HexLines<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> Iterator for HexLines<R> {
    type Item = io::Result<(usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_no += 1;
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && !trimmed.starts_with('#') {
                        return Some(Ok((self.line_no, trimmed.to_string())));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
