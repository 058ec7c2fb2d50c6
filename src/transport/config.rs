//! Listener and connection configuration.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::protocol::{Error, ProtocolId, Result};

/// Default listen port
pub const DEFAULT_PORT: u16 = 20001;

/// Default size of read and write buffers (32 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Transport configuration options.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransportConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Magic code and version every header must carry.
    pub protocol: ProtocolId,
    /// Size of each pooled read buffer in bytes.
    pub read_buffer_size: usize,
    /// Size of each pooled write buffer in bytes.
    pub write_buffer_size: usize,
    /// Maximum idle buffers retained per pool, per connection.
    pub max_pooled_buffers: usize,
    /// Optional read timeout for accepted sockets.
    pub read_timeout: Option<Duration>,
    /// Optional write timeout for accepted sockets.
    pub write_timeout: Option<Duration>,
}

impl TransportConfig {
    /// Default configuration bound to `listen_addr`.
    #[must_use]
    pub fn with_addr(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }

    /// Reject sizes no connection could run with.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("read_buffer_size", self.read_buffer_size),
            ("write_buffer_size", self.write_buffer_size),
            ("max_pooled_buffers", self.max_pooled_buffers),
        ] {
            if value == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{field} must be positive"),
                )));
            }
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            protocol: ProtocolId::default(),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_pooled_buffers: 64,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
