//! Wire protocol of the I/O controller
//!
//! - CRC-16 checksum (bitwise and table-driven)
//! - Input bit addresses (`I0.0`, `I71`)
//! - Status/control frame codec and stream decoder

pub mod address;
pub mod checksum;
pub mod frame;

pub use address::{resolve, AddressError, SignalAddress};
pub use checksum::{crc16, crc16_bitwise, verify_crc16, CrcOrder};
pub use frame::{
    read_signal, FrameDecoder, FrameError, InboundFrame, OutboundFrame, DATA_BYTES,
    INBOUND_MARKER, INBOUND_MAX_LEN, INBOUND_MIN_LEN, IO_BITS, OUTBOUND_LEN, OUTBOUND_MARKER,
    OUTBOUND_STATUS,
};
