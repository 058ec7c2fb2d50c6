//! Citron - length-prefixed binary request/response protocol over TCP
//!
//! Every package on the wire is a fixed 16-byte big-endian header followed by
//! a body whose size the header declares. A [`Listener`] accepts connections,
//! reassembles packages out of arbitrary TCP chunking and hands each body to a
//! per-connection [`RequestHandler`], which streams its response back through
//! pooled write buffers.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use citron::{Client, ClientConfig, Listener, TransportConfig};
//! use citron::handler::echo_factory;
//!
//! let config = TransportConfig::with_addr("127.0.0.1:0".parse().unwrap());
//! let listener = Listener::bind(config, echo_factory())?;
//!
//! let mut client = Client::connect(listener.local_addr(), &ClientConfig::default())?;
//! assert_eq!(&client.call(b"ping")?[..], b"ping");
//!
//! listener.close()?;
//! # Ok::<(), citron::Error>(())
//! ```
//!
//! # Features
//!
//! - **Chunking-agnostic reassembly** - packages survive any split or coalescing
//! - **Streaming responses** - bodies of any declared length, packed into pooled buffers
//! - **Connection isolation** - a protocol error closes only the offending connection
//! - **Built-in observability** - `tracing` spans and process-wide counters

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod client;
pub mod handler;
pub mod protocol;
pub mod transport;

pub use client::{Client, ClientConfig, ResponseBody};
pub use handler::{HandlerFactory, RequestHandler};
pub use protocol::{
    Error, HEADER_SIZE, MAGIC_CODE, MetricsSnapshot, PackageHeader, PackageWriter, ProtocolId,
    Result, VERSION, metrics_snapshot,
};
pub use transport::{Connection, ConnectionId, DEFAULT_PORT, Listener, TransportConfig};
