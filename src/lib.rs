//! # IoRelay Core Library
//!
//! Bit routing between an I/O controller's status frames and the control
//! frames sent back to it:
//! - CRC-16 checksum (bitwise and table-driven)
//! - Input addresses in dotted (`I3.5`) and flat (`I71`) form
//! - 192-entry routing table with per-bit rising-edge latches
//! - Status/control frame codec and stream decoder
//! - Named signal monitor
//! - Serial relay session
//!
//! ## Example
//!
//! ```rust,no_run
//! use iorelay_core::{
//!     RelayConfig, RelaySession, RoutingEngine, RoutingTable, SerialConfig, SerialTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let table = RoutingTable::load(std::path::Path::new("routing.json"))?;
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 115200));
//!     let session = RelaySession::start(
//!         Box::new(transport),
//!         RoutingEngine::new(table),
//!         RelayConfig::default(),
//!     )
//!     .await?;
//!
//!     let mut rx = session.subscribe();
//!     while let Ok(event) = rx.recv().await {
//!         if let iorelay_core::RelayEvent::FrameRouted { outbound, .. } = event {
//!             println!("Sent: {:?}", outbound);
//!         }
//!     }
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError, RelaySettings};
pub use crate::core::protocol::{
    crc16, resolve, AddressError, CrcOrder, FrameDecoder, FrameError, InboundFrame,
    OutboundFrame, SignalAddress,
};
pub use crate::core::relay::{EngineSnapshot, RelayConfig, RelayError, RelayEvent, RelaySession};
pub use crate::core::routing::{RoutingEngine, RoutingEntry, RoutingError, RoutingTable};
pub use crate::core::signals::{SignalConfig, SignalMonitor};
pub use crate::core::transport::{SerialConfig, SerialFlowControl, SerialTransport, TransportTrait};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
