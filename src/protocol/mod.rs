//! Citron protocol core implementation
//!
//! This module provides the wire format, the protocol identity carried by
//! every header, and the package reassembly state machine.

mod error;
mod header;
pub(crate) mod metrics;
mod reassembly;

pub use error::{Error, Result};
pub use header::PackageHeader;
pub use metrics::{MetricsSnapshot, snapshot as metrics_snapshot};
pub use reassembly::{PackageWriter, Reassembler, ReassemblyState};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default magic code identifying Citron packages
pub const MAGIC_CODE: u16 = 0xC100;

/// Default protocol version
pub const VERSION: u16 = 0x0001;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Constants a peer must match for its headers to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtocolId {
    /// Magic code expected in every header
    pub magic_code: u16,
    /// Version expected in every header
    pub version: u16,
}

impl ProtocolId {
    /// Create a protocol identity from explicit constants.
    #[must_use]
    pub const fn new(magic_code: u16, version: u16) -> Self {
        Self {
            magic_code,
            version,
        }
    }

    /// Build a header carrying this identity.
    #[must_use]
    pub const fn header(&self, length: i64) -> PackageHeader {
        PackageHeader::new(self.magic_code, self.version, length)
    }

    /// Validate a decoded header against this identity.
    pub fn validate(&self, header: &PackageHeader) -> Result<()> {
        if header.magic_code() != self.magic_code {
            return Err(Error::ProtocolMismatch {
                field: "magic_code",
                expected: self.magic_code,
                found: header.magic_code(),
            });
        }

        if header.version() != self.version {
            return Err(Error::ProtocolMismatch {
                field: "version",
                expected: self.version,
                found: header.version(),
            });
        }

        header.body_len()?;
        Ok(())
    }
}

impl Default for ProtocolId {
    fn default() -> Self {
        Self::new(MAGIC_CODE, VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_matching_header() {
        let protocol = ProtocolId::default();
        assert!(protocol.validate(&protocol.header(12)).is_ok());
    }

    #[test]
    fn test_validate_rejects_magic() {
        let protocol = ProtocolId::default();
        let header = PackageHeader::new(0xBEEF, VERSION, 0);

        assert!(matches!(
            protocol.validate(&header),
            Err(Error::ProtocolMismatch {
                field: "magic_code",
                expected: MAGIC_CODE,
                found: 0xBEEF,
            })
        ));
    }

    #[test]
    fn test_validate_rejects_version() {
        let protocol = ProtocolId::new(MAGIC_CODE, 7);
        let header = PackageHeader::new(MAGIC_CODE, VERSION, 0);

        assert!(matches!(
            protocol.validate(&header),
            Err(Error::ProtocolMismatch {
                field: "version",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_length() {
        let protocol = ProtocolId::default();
        assert!(matches!(
            protocol.validate(&protocol.header(-5)),
            Err(Error::NegativeLength { length: -5 })
        ));
    }
}
