//! Package reassembly state machine
//!
//! TCP delivers bytes, not packages. A single read may hold part of a header,
//! several back-to-back packages, or the tail of one body followed by the
//! start of the next header. [`Reassembler::feed`] accepts chunks of any size
//! and recovers package boundaries from the declared body lengths.

use std::io::Read;
use std::time::Instant;

use tracing::{debug, trace};

use super::metrics::Metrics;
use super::{Error, HEADER_SIZE, PackageHeader, ProtocolId, Result};
use crate::handler::RequestHandler;

/// Sink for response packages produced by a handler.
///
/// Each call emits exactly one package: a header declaring `length`, followed
/// by exactly `length` bytes pulled from `body`.
pub trait PackageWriter {
    /// Emit one response package.
    fn write_package(&mut self, length: i64, body: &mut dyn Read) -> Result<()>;
}

/// Where the reassembler is within the current package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// Accumulating header bytes
    AwaitingHeader {
        /// Header bytes received so far
        header_offset: usize,
    },
    /// Header validated, accumulating body bytes
    ReadingBody {
        /// Validated header of the current package
        header: PackageHeader,
        /// Body bytes forwarded to the handler so far
        body_offset: u64,
    },
}

impl Default for ReassemblyState {
    fn default() -> Self {
        Self::AwaitingHeader { header_offset: 0 }
    }
}

/// Serial package reassembler driving a [`RequestHandler`].
///
/// One instance belongs to exactly one connection. Any error returned from
/// [`Reassembler::feed`] leaves the stream desynchronized, so the owner must
/// tear the connection down.
#[derive(Debug)]
pub struct Reassembler<H> {
    protocol: ProtocolId,
    state: ReassemblyState,
    header_buf: [u8; HEADER_SIZE],
    handler: H,
}

impl<H: RequestHandler> Reassembler<H> {
    /// Create a reassembler validating headers against `protocol`.
    pub fn new(protocol: ProtocolId, handler: H) -> Self {
        Self {
            protocol,
            state: ReassemblyState::default(),
            header_buf: [0u8; HEADER_SIZE],
            handler,
        }
    }

    /// Current reassembly state.
    #[must_use]
    pub const fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Borrow the wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume one chunk of stream bytes.
    ///
    /// Every completed package triggers the handler's completion hook with
    /// `writer`. Returns the number of packages completed by this chunk.
    pub fn feed(&mut self, mut chunk: &[u8], writer: &mut dyn PackageWriter) -> Result<usize> {
        let mut completed = 0;

        loop {
            match self.state {
                ReassemblyState::AwaitingHeader { header_offset } => {
                    if chunk.is_empty() {
                        break;
                    }

                    let take = (HEADER_SIZE - header_offset).min(chunk.len());
                    self.header_buf[header_offset..header_offset + take]
                        .copy_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];

                    let header_offset = header_offset + take;
                    if header_offset < HEADER_SIZE {
                        self.state = ReassemblyState::AwaitingHeader { header_offset };
                        break;
                    }

                    let header = PackageHeader::decode(&self.header_buf)?;
                    self.protocol.validate(&header)?;
                    trace!(length = header.length(), "header complete");
                    self.state = ReassemblyState::ReadingBody {
                        header,
                        body_offset: 0,
                    };
                }
                ReassemblyState::ReadingBody {
                    header,
                    body_offset,
                } => {
                    let length = header.body_len()?;
                    if body_offset < length {
                        if chunk.is_empty() {
                            break;
                        }

                        let left = length - body_offset;
                        let take =
                            usize::try_from(left).map_or(chunk.len(), |l| l.min(chunk.len()));
                        let written = self.handler.write(&chunk[..take])?;
                        if written != take {
                            return Err(Error::handler(format!(
                                "handler accepted {written} of {take} body bytes"
                            )));
                        }
                        chunk = &chunk[take..];

                        let body_offset = body_offset + take as u64;
                        self.state = ReassemblyState::ReadingBody {
                            header,
                            body_offset,
                        };
                        if body_offset < length {
                            break;
                        }
                    }

                    self.complete(writer)?;
                    completed += 1;
                }
            }
        }

        Ok(completed)
    }

    fn complete(&mut self, writer: &mut dyn PackageWriter) -> Result<()> {
        let started = Instant::now();
        self.handler.on_package_complete(writer)?;
        Metrics::record_handler_latency(started.elapsed());
        Metrics::record_package_received();
        debug!("package complete");

        self.handler.reset();
        self.state = ReassemblyState::default();
        self.header_buf = [0u8; HEADER_SIZE];
        Ok(())
    }
}
