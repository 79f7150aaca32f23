//! Transport layer between the relay and the I/O controller
//!
//! The relay only needs a byte pipe: push a control frame, pull whatever
//! status bytes have arrived. Serial is the production transport; tests
//! plug in their own implementation of [`TransportTrait`].

mod serial;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub packets_sent: u64,
    /// Non-empty reads
    pub packets_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte pipe to the controller
///
/// Every method takes `&self`: the relay reads from one task and writes from
/// another, so an implementation must never make a `send` wait for a
/// pending `receive`.
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Connect to the target
    async fn connect(&self) -> Result<(), TransportError>;

    /// Disconnect from the target
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send data
    async fn send(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive whatever arrived, empty when the poll interval passed idle
    ///
    /// Any error means the device is gone; the relay stops on it.
    async fn receive(&self) -> Result<Bytes, TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
