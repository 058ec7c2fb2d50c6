//! Minimal TCP stream wrapper shared by a connection's pumps.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::protocol::{Error, Result};

/// Shared handle to a connected TCP stream.
///
/// The read pump, write pump and supervisor each hold a clone; reads and
/// writes go through `&TcpStream`, so no lock is involved.
#[derive(Debug, Clone)]
pub struct StreamSocket {
    stream: Arc<TcpStream>,
    peer: SocketAddr,
}

impl StreamSocket {
    /// Wrap a connected stream, applying the optional socket timeouts.
    ///
    /// A timeout applies to every individual read or write, so an expiry
    /// surfaces as an ordinary [`Error::Io`].
    pub fn new(
        stream: TcpStream,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_write_timeout(write_timeout)?;
        let peer = stream.peer_addr()?;

        Ok(Self {
            stream: Arc::new(stream),
            peer,
        })
    }

    /// Remote address of the stream.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read into `buf`, returning `Ok(0)` at end of stream.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&*self.stream).read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }

    /// Issue a single write of `buf`; accepting fewer bytes is an error.
    pub fn write_once(&self, buf: &[u8]) -> Result<()> {
        let written = loop {
            match (&*self.stream).write(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                other => break other?,
            }
        };

        if written != buf.len() {
            return Err(Error::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    /// Shut the given directions down, unblocking parked reads or writes on them.
    pub fn shutdown(&self, how: Shutdown) {
        if let Err(err) = self.stream.shutdown(how) {
            // NotConnected once the peer already went away
            debug!(peer = %self.peer, error = %err, "socket shutdown");
        }
    }
}
