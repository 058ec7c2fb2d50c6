//! Citron error types

use thiserror::Error;

/// Citron protocol and transport errors
#[derive(Error, Debug)]
pub enum Error {
    /// Magic code or version did not match the configured protocol
    #[error("protocol mismatch: {field} expected {expected:#06x}, got {found:#06x}")]
    ProtocolMismatch {
        /// Header field that failed validation
        field: &'static str,
        /// Configured value
        expected: u16,
        /// Value found on the wire
        found: u16,
    },

    /// Not enough bytes to decode a header
    #[error("malformed header: need {needed} bytes, got {got}")]
    MalformedHeader {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// Header declared a negative body length
    #[error("malformed header: negative body length {length}")]
    NegativeLength {
        /// Declared length
        length: i64,
    },

    /// IO error, including EOF and socket timeouts
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Socket accepted fewer bytes than requested
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the socket
        written: usize,
        /// Bytes handed to the socket
        expected: usize,
    },

    /// Request handler rejected a body chunk or a completed package
    #[error("handler error: {0}")]
    Handler(String),

    /// Response handoff attempted after the connection shut down
    #[error("connection closed")]
    ConnectionClosed,

    /// Shutdown signal was already fired
    #[error("already closed")]
    AlreadyClosed,
}

impl Error {
    /// Build a [`Error::Handler`] from any displayable message.
    pub fn handler(msg: impl std::fmt::Display) -> Self {
        Self::Handler(msg.to_string())
    }

    /// Whether this error is a failure in its own right.
    ///
    /// [`Error::ConnectionClosed`] and [`Error::AlreadyClosed`] only report
    /// that a connection was already shutting down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ConnectionClosed | Self::AlreadyClosed)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
