//! Citron TCP transport: pooled buffers, connection pumps and the listener.

mod buffer;
mod config;
mod connection;
mod listener;
mod shutdown;
mod socket;

pub use buffer::{Buffer, BufferPool, ConnectionBuffers};
pub use config::{DEFAULT_BUFFER_SIZE, DEFAULT_PORT, TransportConfig};
pub use connection::{Connection, ConnectionId, ConnectionObserver, WRITE_LINGER};
pub use listener::Listener;
pub use shutdown::ShutdownSignal;
pub use socket::StreamSocket;
