//! Core module containing the main functionality of IoRelay
//!
//! This module provides:
//! - Wire protocol of the I/O controller (checksum, addresses, frames)
//! - Bit routing table, latch memory and routing engine
//! - Named signal monitor
//! - Transport layer (Serial)
//! - Relay session tying a transport to the engine

pub mod protocol;
pub mod relay;
pub mod routing;
pub mod signals;
pub mod transport;
