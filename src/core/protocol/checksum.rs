//! CRC-16 checksum used by both frame directions
//!
//! Parameters: reflected polynomial 0xA001 (0x8005), init 0xFFFF, no final
//! XOR. This is the variant catalogued as CRC-16/MODBUS.

use serde::{Deserialize, Serialize};

/// Initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Reflected polynomial
pub const CRC16_POLY: u16 = 0xA001;

/// Register value left after running the CRC over a buffer that already
/// carries its own checksum appended low byte first.
pub const CRC16_RESIDUE: u16 = 0x0000;

/// Precomputed per-byte table for [`crc16`]
pub static CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Byte order of the two checksum bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcOrder {
    /// `CRC_hi, CRC_lo`
    #[default]
    HighFirst,
    /// `CRC_lo, CRC_hi`
    LowFirst,
}

impl CrcOrder {
    /// Split a checksum into its two wire bytes
    pub fn to_bytes(self, crc: u16) -> [u8; 2] {
        match self {
            CrcOrder::HighFirst => crc.to_be_bytes(),
            CrcOrder::LowFirst => crc.to_le_bytes(),
        }
    }

    /// Rebuild a checksum from its two wire bytes
    pub fn from_bytes(self, bytes: [u8; 2]) -> u16 {
        match self {
            CrcOrder::HighFirst => u16::from_be_bytes(bytes),
            CrcOrder::LowFirst => u16::from_le_bytes(bytes),
        }
    }
}

impl std::str::FromStr for CrcOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "high_first" | "high" | "hi" | "be" | "big" => Ok(Self::HighFirst),
            "low_first" | "low" | "lo" | "le" | "little" => Ok(Self::LowFirst),
            other => Err(format!("unknown CRC byte order: {other}")),
        }
    }
}

/// Advance the CRC register by one byte, bit by bit
pub fn update_bitwise(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ u16::from(byte);
    for _ in 0..8 {
        if crc & 0x0001 != 0 {
            crc = (crc >> 1) ^ CRC16_POLY;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Advance the CRC register by one byte using [`CRC16_TABLE`]
#[inline]
pub fn update_table(crc: u16, byte: u8) -> u16 {
    let index = usize::from((crc ^ u16::from(byte)) & 0x00FF);
    (crc >> 8) ^ CRC16_TABLE[index]
}

/// CRC-16 of `data`, table-driven
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &b| update_table(crc, b))
}

/// CRC-16 of `data`, bit by bit
pub fn crc16_bitwise(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &b| update_bitwise(crc, b))
}

/// Append the checksum of `buf` to itself in the given order
pub fn append_crc16(buf: &mut Vec<u8>, order: CrcOrder) {
    let crc = crc16(buf);
    buf.extend_from_slice(&order.to_bytes(crc));
}

/// Check a buffer whose last two bytes are its checksum
pub fn verify_crc16(buf: &[u8], order: CrcOrder) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let (body, trailer) = buf.split_at(buf.len() - 2);
    crc16(body) == order.from_bytes([trailer[0], trailer[1]])
}
