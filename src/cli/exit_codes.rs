//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::protocol::{AddressError, FrameError};
use crate::core::relay::RelayError;
use crate::core::routing::RoutingFileError;
use crate::core::signals::SignalConfigError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Data validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a closing message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Bad command-line input
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl ExitCodes {
    /// Exit code for an I/O failure
    pub fn for_io(err: &std::io::Error) -> u8 {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => Self::PERMISSION_DENIED,
            ErrorKind::ConnectionRefused => Self::CONNECTION_FAILED,
            _ => Self::ERROR,
        }
    }

    /// Exit code for a transport failure
    pub fn for_transport(err: &TransportError) -> u8 {
        match err {
            TransportError::PortNotFound(_) => Self::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => Self::PERMISSION_DENIED,
            TransportError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Self::PERMISSION_DENIED
            }
            _ => Self::CONNECTION_FAILED,
        }
    }

    /// Exit code for a relay failure
    pub fn for_relay(err: &RelayError) -> u8 {
        match err {
            RelayError::Transport(e) => Self::for_transport(e),
            RelayError::Routing(_) => Self::VALIDATION_FAILED,
            RelayError::Closed => Self::INTERNAL_ERROR,
        }
    }

    /// Exit code for a routing file failure
    pub fn for_routing_file(err: &RoutingFileError) -> u8 {
        match err {
            RoutingFileError::Io(e) => Self::for_io(e),
            RoutingFileError::Routing(_) => Self::VALIDATION_FAILED,
            RoutingFileError::Json(_) => Self::CONFIG_ERROR,
        }
    }

    /// Exit code for a signal file failure
    pub fn for_signal_config(err: &SignalConfigError) -> u8 {
        match err {
            SignalConfigError::Io(e) => Self::for_io(e),
            _ => Self::CONFIG_ERROR,
        }
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(ExitCodes::for_io(&err), err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        Self::Error(ExitCodes::for_transport(&err), err.to_string())
    }
}

impl From<RelayError> for CliResult {
    fn from(err: RelayError) -> Self {
        Self::Error(ExitCodes::for_relay(&err), err.to_string())
    }
}

impl From<RoutingFileError> for CliResult {
    fn from(err: RoutingFileError) -> Self {
        Self::Error(ExitCodes::for_routing_file(&err), err.to_string())
    }
}

impl From<SignalConfigError> for CliResult {
    fn from(err: SignalConfigError) -> Self {
        Self::Error(ExitCodes::for_signal_config(&err), err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<FrameError> for CliResult {
    fn from(err: FrameError) -> Self {
        Self::Error(ExitCodes::PROTOCOL_ERROR, err.to_string())
    }
}

impl From<AddressError> for CliResult {
    fn from(err: AddressError) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 6, 7, 8, 9, 14, 17, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
