//! Request handlers consumed by the reassembly state machine.
//!
//! Provides:
//! - [`RequestHandler`] - incremental body sink with a completion hook
//! - [`EchoHandler`] - buffers each body and writes it back
//! - [`CommandHandler`] - buffers each body and answers via a command function
//! - [`HandlerFactory`] - builds one handler per accepted connection
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use citron::handler::{CommandHandler, HandlerFactory, RequestHandler};
//!
//! let factory: HandlerFactory = Arc::new(|| {
//!     Box::new(CommandHandler::new(|body: &[u8]| Ok(body.to_ascii_uppercase().into())))
//!         as Box<dyn RequestHandler>
//! });
//! ```

mod command;
mod echo;

use std::sync::Arc;

pub use command::{Command, CommandHandler, debug_command};
pub use echo::EchoHandler;

use crate::protocol::{PackageWriter, Result};

/// Business logic plugged into a connection.
///
/// For every package the reassembler calls [`write`](Self::write) zero or
/// more times with consecutive body slices, then
/// [`on_package_complete`](Self::on_package_complete) once, then
/// [`reset`](Self::reset). Returning an error from either fallible method
/// closes the connection.
pub trait RequestHandler: Send {
    /// Accept the next slice of the current body. Returns bytes consumed.
    fn write(&mut self, body: &[u8]) -> Result<usize>;

    /// Clear per-package state before the next package.
    fn reset(&mut self);

    /// The current package is complete; emit at most one response.
    fn on_package_complete(&mut self, writer: &mut dyn PackageWriter) -> Result<()>;
}

impl<H: RequestHandler + ?Sized> RequestHandler for Box<H> {
    fn write(&mut self, body: &[u8]) -> Result<usize> {
        (**self).write(body)
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn on_package_complete(&mut self, writer: &mut dyn PackageWriter) -> Result<()> {
        (**self).on_package_complete(writer)
    }
}

/// Builds a fresh handler for each accepted connection.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

/// Factory producing an [`EchoHandler`] per connection.
#[must_use]
pub fn echo_factory() -> HandlerFactory {
    Arc::new(|| Box::new(EchoHandler::new()) as Box<dyn RequestHandler>)
}
