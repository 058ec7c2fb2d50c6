//! Blocking Citron client.
//!
//! Speaks the same wire format as the listener: every request is a header
//! followed by exactly `length` body bytes, and every response is read back
//! through a reader bounded to the declared response length.
//!
//! # Example
//!
//! ```rust,no_run
//! use citron::client::{Client, ClientConfig};
//!
//! let mut client = Client::connect("127.0.0.1:20001", &ClientConfig::default())?;
//! let reply = client.call(b"hello")?;
//! assert_eq!(&reply[..], b"hello");
//! # Ok::<(), citron::Error>(())
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, instrument};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::protocol::{Error, HEADER_SIZE, PackageHeader, ProtocolId, Result};
use crate::transport::DEFAULT_BUFFER_SIZE;

/// Client configuration options.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientConfig {
    /// Magic code and version written into, and expected back in, headers.
    pub protocol: ProtocolId,
    /// Size of the staging buffer used to stream request bodies.
    pub write_buffer_size: usize,
    /// Optional connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolId::default(),
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Connection to a Citron listener.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    protocol: ProtocolId,
    write_buf: Vec<u8>,
    /// Body bytes of an abandoned response still waiting on the stream.
    unread: u64,
}

impl Client {
    /// Connect to `addr`.
    #[instrument(level = "debug", skip_all)]
    pub fn connect<A: ToSocketAddrs>(addr: A, config: &ClientConfig) -> Result<Self> {
        let stream = match config.connect_timeout {
            Some(timeout) => connect_timeout(addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        debug!(peer = ?stream.peer_addr().ok(), "client connected");

        Ok(Self {
            stream,
            protocol: config.protocol,
            write_buf: vec![0u8; config.write_buffer_size.max(HEADER_SIZE)],
            unread: 0,
        })
    }

    /// Remote address.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Send one request: a header declaring `length`, then exactly `length`
    /// bytes pulled from `body`.
    ///
    /// A `body` that ends early fails with an `UnexpectedEof` I/O error; the
    /// stream is then desynchronized and the client should be dropped.
    pub fn send(&mut self, length: i64, body: &mut dyn Read) -> Result<()> {
        let header = self.protocol.header(length);
        let total = header.body_len()?;
        let mut remaining = total;

        self.write_buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        let mut filled = HEADER_SIZE;

        loop {
            let capacity = self.write_buf.len();
            while filled < capacity && remaining > 0 {
                let want = usize::try_from(remaining)
                    .map_or(capacity - filled, |r| r.min(capacity - filled));
                let n = match body.read(&mut self.write_buf[filled..filled + want]) {
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                };
                if n == 0 {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "request body ended after {} of {total} bytes",
                            total - remaining
                        ),
                    )));
                }
                filled += n;
                remaining -= n as u64;
            }

            self.stream.write_all(&self.write_buf[..filled])?;
            if remaining == 0 {
                return Ok(());
            }
            filled = 0;
        }
    }

    /// Send `body` as one request.
    pub fn send_bytes(&mut self, body: &[u8]) -> Result<()> {
        let length = i64::try_from(body.len()).map_err(|_| Error::NegativeLength { length: -1 })?;
        self.send(length, &mut &body[..])
    }

    /// Read the next response header and return its body reader.
    ///
    /// The reader yields exactly the declared body length and no more. Body
    /// bytes left unread when it is dropped are skipped by the next call.
    /// A magic code or version mismatch fails this call only.
    pub fn receive(&mut self) -> Result<ResponseBody<'_>> {
        if self.unread > 0 {
            let pending = self.unread;
            let skipped = io::copy(&mut (&self.stream).take(pending), &mut io::sink())?;
            self.unread -= skipped;
            if skipped < pending {
                return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
            }
        }

        let mut raw = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut raw)?;
        let header = PackageHeader::decode(&raw)?;
        self.protocol.validate(&header)?;
        let remaining = header.body_len()?;

        Ok(ResponseBody {
            client: self,
            header,
            remaining,
        })
    }

    /// Send `body` and collect the whole response body.
    pub fn call(&mut self, body: &[u8]) -> Result<Bytes> {
        self.send_bytes(body)?;
        self.receive()?.read_to_bytes()
    }

    /// Shut the stream down in both directions.
    pub fn close(self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }
}

fn connect_timeout<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

/// Body of one response, bounded to its declared length.
#[derive(Debug)]
pub struct ResponseBody<'a> {
    client: &'a mut Client,
    header: PackageHeader,
    remaining: u64,
}

impl ResponseBody<'_> {
    /// Validated response header.
    #[must_use]
    pub const fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// Body bytes not yet read.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the rest of the body into a contiguous buffer.
    pub fn read_to_bytes(mut self) -> Result<Bytes> {
        let capacity = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let mut out = BytesMut::with_capacity(capacity.min(DEFAULT_BUFFER_SIZE)).writer();
        io::copy(&mut self, &mut out)?;
        if self.remaining > 0 {
            return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(out.into_inner().freeze())
    }
}

impl Read for ResponseBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.client.stream.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl Drop for ResponseBody<'_> {
    fn drop(&mut self) {
        self.client.unread += self.remaining;
    }
}
