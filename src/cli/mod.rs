//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Hex input and formatted output for scripting

pub mod exit_codes;
pub mod pipe;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use pipe::{
    format_error, format_frame, format_readings, hex_string, parse_hex, HexLines, OutputFormat,
};
