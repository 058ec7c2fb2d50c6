//! Citron package header
//!
//! Requests and responses share the same 16-byte header.

use super::{Error, HEADER_SIZE, Result};

/// Citron package header (16 bytes, big-endian)
///
/// # Wire Format
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Magic Code (2)        |          Version (2)          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Reserved CRC (2)       |          Reserved (2)         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                    Body Length (8, signed)                    +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The reserved CRC and reserved fields are always written as zero and
/// ignored when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    magic_code: u16,
    version: u16,
    length: i64,
}

impl PackageHeader {
    /// Create a new package header
    #[must_use]
    pub const fn new(magic_code: u16, version: u16, length: i64) -> Self {
        Self {
            magic_code,
            version,
            length,
        }
    }

    /// Get magic code
    #[must_use]
    pub const fn magic_code(&self) -> u16 {
        self.magic_code
    }

    /// Get protocol version
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Get declared body length
    #[must_use]
    pub const fn length(&self) -> i64 {
        self.length
    }

    /// Declared body length as an unsigned count.
    ///
    /// Fails for negative lengths, which no valid header carries.
    pub fn body_len(&self) -> Result<u64> {
        u64::try_from(self.length).map_err(|_| Error::NegativeLength {
            length: self.length,
        })
    }

    /// Convert to bytes (big-endian)
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..2].copy_from_slice(&self.magic_code.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.version.to_be_bytes());
        // bytes[4..8]: reserved CRC + reserved, always zero
        bytes[8..16].copy_from_slice(&self.length.to_be_bytes());

        bytes
    }

    /// Parse from bytes (big-endian)
    ///
    /// Only the first [`HEADER_SIZE`] bytes are read. No validation against a
    /// configured protocol happens here; see [`super::ProtocolId::validate`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(raw) = bytes.first_chunk::<HEADER_SIZE>() else {
            return Err(Error::MalformedHeader {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        };

        let [m0, m1, v0, v1, _, _, _, _, l0, l1, l2, l3, l4, l5, l6, l7] = *raw;
        Ok(Self {
            magic_code: u16::from_be_bytes([m0, m1]),
            version: u16::from_be_bytes([v0, v1]),
            length: i64::from_be_bytes([l0, l1, l2, l3, l4, l5, l6, l7]),
        })
    }
}
