//! Status and control frame codec
//!
//! Inbound (device → host): `[0x5A, D0..D23, ...]`, at least 25 bytes,
//! trailing bytes ignored.
//! Outbound (host → device): `[0xA5, D0..D23, 0x01, CRC, CRC]`, exactly 27
//! bytes. The checksum covers marker, data and status byte.
//!
//! Data bytes carry 8 I/O bits each, MSB-first: bit `n` lives in `D[n / 8]`
//! under mask `0x80 >> (n % 8)`.

use super::address::SignalAddress;
use super::checksum::{crc16, CrcOrder};
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Marker of a device status frame
pub const INBOUND_MARKER: u8 = 0x5A;

/// Marker of a host control frame
pub const OUTBOUND_MARKER: u8 = 0xA5;

/// Constant status byte of a control frame
pub const OUTBOUND_STATUS: u8 = 0x01;

/// Number of data bytes in either direction
pub const DATA_BYTES: usize = 24;

/// Number of addressable I/O bits in either direction
pub const IO_BITS: usize = DATA_BYTES * 8;

/// Minimum length of a valid inbound frame
pub const INBOUND_MIN_LEN: usize = 1 + DATA_BYTES;

/// Longest status frame the stream decoder will cut
pub const INBOUND_MAX_LEN: usize = 1024;

/// Exact length of an outbound frame
pub const OUTBOUND_LEN: usize = 1 + DATA_BYTES + 1 + 2;

/// Frame error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a frame needs
    #[error("Frame too short: {len} bytes, need at least {INBOUND_MIN_LEN}")]
    TooShort {
        /// Received length
        len: usize,
    },

    /// First byte is not the expected marker
    #[error("Invalid frame marker: 0x{0:02X}")]
    InvalidMarker(u8),

    /// Control frame of the wrong size
    #[error("Control frame must be {OUTBOUND_LEN} bytes, got {len}")]
    WrongLength {
        /// Received length
        len: usize,
    },

    /// Checksum trailer does not match the frame body
    #[error("Checksum mismatch: expected 0x{expected:04X}, found 0x{actual:04X}")]
    ChecksumMismatch {
        /// Checksum computed over the body
        expected: u16,
        /// Checksum carried by the frame
        actual: u16,
    },
}

// ============ Bit helpers ============

/// Value of I/O bit `bit` in an MSB-first data region, 0 when out of range
pub fn get_bit(data: &[u8], bit: usize) -> bool {
    data.get(bit / 8)
        .map_or(false, |byte| byte & (0x80 >> (bit % 8)) != 0)
}

/// Set or clear I/O bit `bit` in an MSB-first data region
pub fn set_bit(data: &mut [u8], bit: usize, value: bool) {
    if let Some(byte) = data.get_mut(bit / 8) {
        let mask = 0x80 >> (bit % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

// ============ Inbound ============

/// A validated device status frame
#[derive(Clone, PartialEq, Eq)]
pub struct InboundFrame {
    raw: Bytes,
}

impl InboundFrame {
    /// Validate raw bytes as a status frame
    pub fn parse(raw: impl Into<Bytes>) -> Result<Self, FrameError> {
        let raw = raw.into();
        if raw.len() < INBOUND_MIN_LEN {
            return Err(FrameError::TooShort { len: raw.len() });
        }
        if raw[0] != INBOUND_MARKER {
            return Err(FrameError::InvalidMarker(raw[0]));
        }
        Ok(Self { raw })
    }

    /// Build a status frame from its data bytes
    pub fn from_data(data: [u8; DATA_BYTES]) -> Self {
        let mut raw = Vec::with_capacity(INBOUND_MIN_LEN);
        raw.push(INBOUND_MARKER);
        raw.extend_from_slice(&data);
        Self { raw: raw.into() }
    }

    /// `D0..D23`
    pub fn data(&self) -> &[u8] {
        &self.raw[1..INBOUND_MIN_LEN]
    }

    /// Whole frame as received, trailing bytes included
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Value of input bit `bit` (0..191)
    pub fn input(&self, bit: usize) -> bool {
        get_bit(self.data(), bit)
    }

    /// Value of a named signal, see [`read_signal`]
    pub fn signal(&self, address: SignalAddress) -> bool {
        read_signal(&self.raw, address)
    }
}

impl fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InboundFrame({})", hex::encode_upper(&self.raw))
    }
}

/// Read one signal bit out of a raw status frame
///
/// `address.byte_index` counts data bytes, so the marker is skipped. Reads
/// past the end of `frame` yield `false`.
pub fn read_signal(frame: &[u8], address: SignalAddress) -> bool {
    address
        .byte_index
        .checked_add(1)
        .and_then(|i| frame.get(i))
        .map_or(false, |byte| (byte >> address.bit_index) & 1 == 1)
}

// ============ Outbound ============

/// A complete host control frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: [u8; OUTBOUND_LEN],
}

impl OutboundFrame {
    /// Wrap output data with marker, status byte and checksum
    pub fn assemble(data: &[u8; DATA_BYTES], order: CrcOrder) -> Self {
        let mut bytes = [0u8; OUTBOUND_LEN];
        bytes[0] = OUTBOUND_MARKER;
        bytes[1..=DATA_BYTES].copy_from_slice(data);
        bytes[DATA_BYTES + 1] = OUTBOUND_STATUS;
        let crc = crc16(&bytes[..OUTBOUND_LEN - 2]);
        bytes[OUTBOUND_LEN - 2..].copy_from_slice(&order.to_bytes(crc));
        Self { bytes }
    }

    /// Parse and verify a control frame
    pub fn parse(raw: &[u8], order: CrcOrder) -> Result<Self, FrameError> {
        let bytes: [u8; OUTBOUND_LEN] = raw
            .try_into()
            .map_err(|_| FrameError::WrongLength { len: raw.len() })?;
        if bytes[0] != OUTBOUND_MARKER {
            return Err(FrameError::InvalidMarker(bytes[0]));
        }
        let frame = Self { bytes };
        frame.verify(order)?;
        Ok(frame)
    }

    /// Recompute the checksum and compare it with the trailer
    pub fn verify(&self, order: CrcOrder) -> Result<(), FrameError> {
        let expected = crc16(&self.bytes[..OUTBOUND_LEN - 2]);
        let actual = self.crc(order);
        if expected == actual {
            Ok(())
        } else {
            Err(FrameError::ChecksumMismatch { expected, actual })
        }
    }

    /// Output data `D0..D23`
    pub fn data(&self) -> &[u8] {
        &self.bytes[1..=DATA_BYTES]
    }

    /// Value of output bit `bit` (0..191)
    pub fn output(&self, bit: usize) -> bool {
        get_bit(self.data(), bit)
    }

    /// Checksum carried in the trailer
    pub fn crc(&self, order: CrcOrder) -> u16 {
        order.from_bytes([self.bytes[OUTBOUND_LEN - 2], self.bytes[OUTBOUND_LEN - 1]])
    }

    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8; OUTBOUND_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutboundFrame({})", hex::encode_upper(self.bytes))
    }
}

impl AsRef<[u8]> for OutboundFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// ============ Stream decoder ============

/// Cuts status frames out of a byte stream
///
/// Bytes before a marker are discarded. Once a marker is found the decoder
/// waits for `frame_len` bytes and emits them as one frame.
#[derive(Debug)]
pub struct FrameDecoder {
    frame_len: usize,
    buffer: BytesMut,
    discarded: u64,
}

impl FrameDecoder {
    /// Create a decoder for frames of `frame_len` bytes, clamped to
    /// `INBOUND_MIN_LEN..=INBOUND_MAX_LEN`
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.clamp(INBOUND_MIN_LEN, INBOUND_MAX_LEN);
        Self {
            frame_len,
            buffer: BytesMut::with_capacity(frame_len * 4),
            discarded: 0,
        }
    }

    /// Add data and return the complete frames it finished
    pub fn push(&mut self, data: &[u8]) -> Vec<InboundFrame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match self.buffer.iter().position(|&b| b == INBOUND_MARKER) {
                Some(0) => {}
                Some(skip) => {
                    tracing::debug!("Discarding {} bytes before frame marker", skip);
                    self.discarded += skip as u64;
                    self.buffer.advance(skip);
                }
                None => {
                    self.discarded += self.buffer.len() as u64;
                    self.buffer.clear();
                    break;
                }
            }

            if self.buffer.len() < self.frame_len {
                break;
            }

            let raw = self.buffer.split_to(self.frame_len).freeze();
            match InboundFrame::parse(raw) {
                Ok(frame) => frames.push(frame),
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            }
        }

        frames
    }

    /// Bytes thrown away while hunting for a marker
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(INBOUND_MIN_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::checksum::verify_crc16;

    fn status(first: u8) -> Vec<u8> {
        let mut raw = vec![0u8; INBOUND_MIN_LEN];
        raw[0] = INBOUND_MARKER;
        raw[1] = first;
        raw
    }

    #[test]
    fn test_inbound_validation() {
        assert!(InboundFrame::parse(status(0)).is_ok());
        assert_eq!(
            InboundFrame::parse(vec![INBOUND_MARKER; 24]),
            Err(FrameError::TooShort { len: 24 })
        );
        let mut bad = status(0);
        bad[0] = 0xA5;
        assert_eq!(InboundFrame::parse(bad), Err(FrameError::InvalidMarker(0xA5)));
    }

    #[test]
    fn test_trailing_bytes_ignored_by_data() {
        let mut raw = status(0x80);
        raw.extend_from_slice(&[0xEB, 0x90]);
        let frame = InboundFrame::parse(raw).unwrap();
        assert_eq!(frame.data().len(), DATA_BYTES);
        assert!(frame.input(0));
        assert!(!frame.input(1));
        assert_eq!(frame.as_bytes().len(), INBOUND_MIN_LEN + 2);
    }

    #[test]
    fn test_bit_helpers_msb_first() {
        let mut data = [0u8; DATA_BYTES];
        set_bit(&mut data, 0, true);
        set_bit(&mut data, 15, true);
        set_bit(&mut data, 191, true);
        assert_eq!(data[0], 0x80);
        assert_eq!(data[1], 0x01);
        assert_eq!(data[23], 0x01);
        set_bit(&mut data, 0, false);
        assert_eq!(data[0], 0x00);
        assert!(!get_bit(&data, 192));
        set_bit(&mut data, 500, true);
    }

    #[test]
    fn test_read_signal() {
        let frame = status(0b0010_0001);
        assert!(read_signal(&frame, SignalAddress { byte_index: 0, bit_index: 0 }));
        assert!(read_signal(&frame, SignalAddress { byte_index: 0, bit_index: 5 }));
        assert!(!read_signal(&frame, SignalAddress { byte_index: 0, bit_index: 7 }));
        assert!(!read_signal(&frame, SignalAddress { byte_index: 40, bit_index: 0 }));
        assert!(!read_signal(&[], SignalAddress::from_flat(0)));
        let far = SignalAddress { byte_index: usize::MAX, bit_index: 0 };
        assert!(!read_signal(&frame, far));
    }

    #[test]
    fn test_outbound_layout() {
        let mut data = [0u8; DATA_BYTES];
        data[0] = 0x80;
        let frame = OutboundFrame::assemble(&data, CrcOrder::HighFirst);
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), OUTBOUND_LEN);
        assert_eq!(bytes[0], OUTBOUND_MARKER);
        assert_eq!(bytes[1], 0x80);
        assert_eq!(bytes[25], OUTBOUND_STATUS);
        assert!(verify_crc16(bytes, CrcOrder::HighFirst));
        assert!(frame.verify(CrcOrder::HighFirst).is_ok());
        assert!(frame.output(0));
    }

    #[test]
    fn test_outbound_parse_rejects_corruption() {
        let frame = OutboundFrame::assemble(&[0x11; DATA_BYTES], CrcOrder::HighFirst);
        let mut raw = frame.as_bytes().to_vec();
        assert_eq!(OutboundFrame::parse(&raw, CrcOrder::HighFirst), Ok(frame));

        raw[3] ^= 0xFF;
        assert!(matches!(
            OutboundFrame::parse(&raw, CrcOrder::HighFirst),
            Err(FrameError::ChecksumMismatch { .. })
        ));
        assert_eq!(
            OutboundFrame::parse(&raw[..26], CrcOrder::HighFirst),
            Err(FrameError::WrongLength { len: 26 })
        );
    }

    #[test]
    fn test_decoder_resyncs_and_splits() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0x00, 0xFF];
        stream.extend(status(0x01));
        stream.extend(status(0x02));

        let first = decoder.push(&stream[..10]);
        assert!(first.is_empty());
        let rest = decoder.push(&stream[10..]);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].data()[0], 0x01);
        assert_eq!(rest[1].data()[0], 0x02);
        assert_eq!(decoder.discarded(), 2);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_with_trailer_length() {
        let mut decoder = FrameDecoder::new(27);
        let mut raw = status(0x40);
        raw.extend_from_slice(&[0xEB, 0x90]);
        let frames = decoder.push(&raw);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].input(1));
    }

    #[test]
    fn test_decoder_frame_len_is_clamped() {
        let mut decoder = FrameDecoder::new(usize::MAX);
        let mut raw = status(0x01);
        raw.resize(INBOUND_MAX_LEN, 0);
        let frames = decoder.push(&raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes().len(), INBOUND_MAX_LEN);

        let mut decoder = FrameDecoder::new(3);
        assert_eq!(decoder.push(&status(0x01)).len(), 1);
    }
}
