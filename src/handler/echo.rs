//! Accumulate-and-echo handler.

use bytes::BytesMut;

use super::RequestHandler;
use crate::protocol::{Error, PackageWriter, Result};

/// Buffers the whole request body, then writes it back as the response.
#[derive(Debug, Default)]
pub struct EchoHandler {
    body: BytesMut,
}

impl EchoHandler {
    /// Create an empty echo handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered for the current package.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.body
    }
}

impl RequestHandler for EchoHandler {
    fn write(&mut self, body: &[u8]) -> Result<usize> {
        self.body.extend_from_slice(body);
        Ok(body.len())
    }

    fn reset(&mut self) {
        self.body.clear();
    }

    fn on_package_complete(&mut self, writer: &mut dyn PackageWriter) -> Result<()> {
        let length = i64::try_from(self.body.len()).map_err(Error::handler)?;
        writer.write_package(length, &mut &self.body[..])
    }
}
