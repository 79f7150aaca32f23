//! Input bit addresses
//!
//! Two spellings are accepted, both case-insensitive with an optional
//! leading `I`:
//! - `I<byte>.<bit>` (e.g. `I1.5`): byte index and bit-within-byte, where bit
//!   0 is the least-significant bit of that byte.
//! - `I<n>` (e.g. `I71`): flat input number, `byte = n / 8`,
//!   `bit = 7 - n % 8`, so flat bit 0 is the most-significant bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Empty, non-numeric or out-of-range address
    #[error("Malformed signal address: '{0}'")]
    Malformed(String),
}

/// A resolved `(byte_index, bit_index)` pair into the data region of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalAddress {
    /// Data byte index (`D<n>`, not counting the marker byte)
    pub byte_index: usize,
    /// Bit within the byte, 0 = least significant
    pub bit_index: u8,
}

impl SignalAddress {
    /// Create an address from its parts
    pub fn new(byte_index: usize, bit_index: u8) -> Result<Self, AddressError> {
        if bit_index > 7 {
            return Err(AddressError::Malformed(format!("I{byte_index}.{bit_index}")));
        }
        Ok(Self { byte_index, bit_index })
    }

    /// Address of flat input bit `n` (MSB-first within each byte)
    pub fn from_flat(n: usize) -> Self {
        Self {
            byte_index: n / 8,
            bit_index: 7 - (n % 8) as u8,
        }
    }

    /// Flat input number this address corresponds to, `None` when it does
    /// not fit in a `usize`
    pub fn flat(&self) -> Option<usize> {
        self.byte_index
            .checked_mul(8)?
            .checked_add(usize::from(7 - self.bit_index))
    }

    /// Mask selecting this bit within its byte
    pub fn mask(&self) -> u8 {
        1 << self.bit_index
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}.{}", self.byte_index, self.bit_index)
    }
}

impl FromStr for SignalAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}

/// Resolve an address string into a [`SignalAddress`]
pub fn resolve(address: &str) -> Result<SignalAddress, AddressError> {
    let normalized = normalize(address);
    let malformed = || AddressError::Malformed(address.to_string());

    // normalize() guarantees the leading 'I'
    let rest = &normalized[1..];
    if rest.is_empty() {
        return Err(malformed());
    }

    match rest.split_once('.') {
        Some((byte_str, bit_str)) => {
            let byte_index = parse_index(byte_str).ok_or_else(malformed)?;
            let bit_index = parse_index(bit_str).ok_or_else(malformed)?;
            if bit_index > 7 {
                return Err(malformed());
            }
            Ok(SignalAddress {
                byte_index,
                bit_index: bit_index as u8,
            })
        }
        None => {
            let n = parse_index(rest).ok_or_else(malformed)?;
            Ok(SignalAddress::from_flat(n))
        }
    }
}

/// Trim, uppercase and make sure the address starts with `I`
pub fn normalize(address: &str) -> String {
    let upper = address.trim().to_uppercase();
    if upper.starts_with('I') {
        upper
    } else {
        format!("I{upper}")
    }
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
