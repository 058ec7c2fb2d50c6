//! Command handler: answers each package with the output of a function.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::RequestHandler;
use crate::protocol::{Error, PackageWriter, Result};

/// User-supplied command: maps a complete request body to a response body.
pub type Command = Arc<dyn Fn(&[u8]) -> Result<Bytes> + Send + Sync>;

/// Buffers each request body and answers with the result of a [`Command`].
pub struct CommandHandler {
    body: BytesMut,
    command: Command,
}

impl CommandHandler {
    /// Wrap a command function.
    pub fn new<F>(command: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Bytes> + Send + Sync + 'static,
    {
        Self::from_command(Arc::new(command))
    }

    /// Wrap an already shared command.
    #[must_use]
    pub fn from_command(command: Command) -> Self {
        Self {
            body: BytesMut::new(),
            command,
        }
    }

    /// Handler running [`debug_command`].
    #[must_use]
    pub fn debug() -> Self {
        Self::new(debug_command)
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandler")
            .field("buffered", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl RequestHandler for CommandHandler {
    fn write(&mut self, body: &[u8]) -> Result<usize> {
        self.body.extend_from_slice(body);
        Ok(body.len())
    }

    fn reset(&mut self) {
        self.body.clear();
    }

    fn on_package_complete(&mut self, writer: &mut dyn PackageWriter) -> Result<()> {
        let response = (self.command)(&self.body[..])?;
        debug!(
            request = self.body.len(),
            response = response.len(),
            "command executed"
        );
        let length = i64::try_from(response.len()).map_err(Error::handler)?;
        writer.write_package(length, &mut &response[..])
    }
}

/// Diagnostic command answering `"debug: "` followed by the request body.
pub fn debug_command(body: &[u8]) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(7 + body.len());
    out.extend_from_slice(b"debug: ");
    out.extend_from_slice(body);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[derive(Default)]
    struct Capture(Vec<Vec<u8>>);

    impl PackageWriter for Capture {
        fn write_package(&mut self, length: i64, body: &mut dyn Read) -> Result<()> {
            let mut buf = Vec::new();
            body.read_to_end(&mut buf)?;
            assert_eq!(usize::try_from(length).unwrap(), buf.len());
            self.0.push(buf);
            Ok(())
        }
    }

    #[test]
    fn test_debug_command() {
        let mut handler = CommandHandler::debug();
        let mut capture = Capture::default();

        handler.write(b"ping").unwrap();
        handler.on_package_complete(&mut capture).unwrap();

        assert_eq!(capture.0, vec![b"debug: ping".to_vec()]);
    }

    #[test]
    fn test_command_error_surfaces() {
        let mut handler = CommandHandler::new(|_| Err(Error::handler("unknown command")));
        let mut capture = Capture::default();

        handler.write(b"x").unwrap();
        assert!(matches!(
            handler.on_package_complete(&mut capture),
            Err(Error::Handler(_))
        ));
        assert!(capture.0.is_empty());
    }

    #[test]
    fn test_reset_clears_body() {
        let mut handler = CommandHandler::new(|body| Ok(Bytes::copy_from_slice(body)));
        let mut capture = Capture::default();

        handler.write(b"first").unwrap();
        handler.reset();
        handler.write(b"second").unwrap();
        handler.on_package_complete(&mut capture).unwrap();

        assert_eq!(capture.0, vec![b"second".to_vec()]);
    }
}
