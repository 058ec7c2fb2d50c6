//! Per-connection pumps.
//!
//! Each connection runs four threads:
//!
//! ```text
//! socket ─▶ read pump ─(rendezvous)─▶ processor ─(rendezvous)─▶ write pump ─▶ socket
//!                                        │
//!                               Reassembler + handler
//! ```
//!
//! plus a supervisor that waits for the shutdown signal, shuts the read half
//! down so a parked read returns, lets the write pump flush handed-off
//! responses for up to [`WRITE_LINGER`], then releases the socket and
//! notifies observers. Buffers move between stages by value; no stage
//! touches another's buffer.

use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::buffer::{Buffer, BufferPool, ConnectionBuffers};
use super::config::TransportConfig;
use super::shutdown::ShutdownSignal;
use super::socket::StreamSocket;
use crate::handler::RequestHandler;
use crate::protocol::metrics::Metrics;
use crate::protocol::{Error, HEADER_SIZE, PackageWriter, ProtocolId, Reassembler, Result};

/// How long a closing connection waits for pending responses to reach the socket.
pub const WRITE_LINGER: Duration = Duration::from_secs(1);

/// Unique identity of a connection within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notified once a connection has fully closed.
pub trait ConnectionObserver: Send + Sync {
    /// The connection released its socket and all of its threads exited.
    fn connection_closed(&self, id: ConnectionId);
}

/// A live server-side connection.
pub struct Connection {
    id: ConnectionId,
    socket: StreamSocket,
    protocol: ProtocolId,
    buffers: ConnectionBuffers,
    shutdown: ShutdownSignal,
    finished: ShutdownSignal,
    observers: Mutex<Vec<Arc<dyn ConnectionObserver>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.socket.peer_addr())
            .field("closed", &self.shutdown.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap `stream` and start its pumps around `handler`.
    pub fn spawn(
        stream: TcpStream,
        config: &TransportConfig,
        handler: Box<dyn RequestHandler>,
    ) -> Result<Arc<Self>> {
        let connection = Self::new(stream, config)?;
        connection.start(handler)?;
        Ok(connection)
    }

    /// Wrap `stream` without starting any thread.
    pub(crate) fn new(stream: TcpStream, config: &TransportConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let socket = StreamSocket::new(stream, config.read_timeout, config.write_timeout)?;
        let buffers = ConnectionBuffers::new(
            config.read_buffer_size,
            config.write_buffer_size.max(HEADER_SIZE),
            config.max_pooled_buffers,
        );

        Ok(Arc::new(Self {
            id: ConnectionId::new(),
            socket,
            protocol: config.protocol,
            buffers,
            shutdown: ShutdownSignal::new(),
            finished: ShutdownSignal::new(),
            observers: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the read pump, processor, write pump and supervisor.
    #[instrument(level = "debug", skip_all, fields(id = %self.id, peer = %self.socket.peer_addr()))]
    pub(crate) fn start(self: &Arc<Self>, handler: Box<dyn RequestHandler>) -> Result<()> {
        let (read_tx, read_rx) = crossbeam_channel::bounded::<Buffer>(0);
        let (write_tx, write_rx) = crossbeam_channel::bounded::<Buffer>(0);

        let reader = {
            let socket = self.socket.clone();
            let pool = self.buffers.read.clone();
            let shutdown = self.shutdown.clone();
            self.spawn_worker("read", move || read_pump(&socket, &pool, &read_tx, &shutdown))
        };

        let processor = {
            let reassembler = Reassembler::new(self.protocol, handler);
            let writer = ResponseWriter {
                protocol: self.protocol,
                pool: self.buffers.write.clone(),
                tx: write_tx,
                shutdown: self.shutdown.clone(),
            };
            let shutdown = self.shutdown.clone();
            self.spawn_worker("process", move || {
                process(reassembler, &read_rx, writer, &shutdown);
            })
        };

        let (drained_tx, drained_rx) = crossbeam_channel::bounded::<()>(0);
        let writer = {
            let socket = self.socket.clone();
            let shutdown = self.shutdown.clone();
            self.spawn_worker("write", move || {
                write_pump(&socket, &write_rx, &shutdown);
                drop(drained_tx);
            })
        };

        let workers = match (reader, processor, writer) {
            (Ok(r), Ok(p), Ok(w)) => Workers {
                reader: r,
                processor: p,
                writer: w,
                drained: drained_rx,
            },
            (r, p, w) => {
                // Whatever did start exits on the signal.
                let _ = self.shutdown.close();
                self.socket.shutdown(Shutdown::Both);
                let err = [r.err(), p.err(), w.err()].into_iter().flatten().next();
                return Err(err.map_or(Error::ConnectionClosed, Error::Io));
            }
        };

        Metrics::record_connection_open();
        let connection = Arc::clone(self);
        let supervisor = thread::Builder::new()
            .name(format!("citron-conn-{}", self.id))
            .spawn(move || connection.supervise(workers));
        if let Err(err) = supervisor {
            Metrics::record_connection_close();
            let _ = self.shutdown.close();
            self.socket.shutdown(Shutdown::Both);
            return Err(err.into());
        }

        info!("connection opened");
        Ok(())
    }

    fn spawn_worker<F>(&self, role: &str, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("citron-{role}-{}", self.id))
            .spawn(f)
    }

    fn supervise(self: Arc<Self>, workers: Workers) {
        self.shutdown.wait();
        self.socket.shutdown(Shutdown::Read);

        let Workers {
            reader,
            processor,
            writer,
            drained,
        } = workers;
        self.join_worker(reader);
        self.join_worker(processor);

        // The processor is gone, so the write pump only has buffers it already took.
        if drained.recv_timeout(WRITE_LINGER).is_err_and(|e| e.is_timeout()) {
            debug!(id = %self.id, "write pump did not drain in time");
        }
        self.socket.shutdown(Shutdown::Both);
        self.join_worker(writer);

        Metrics::record_connection_close();
        info!(id = %self.id, peer = %self.socket.peer_addr(), "connection closed");

        let observers = std::mem::take(
            &mut *self
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for observer in observers {
            observer.connection_closed(self.id);
        }
        let _ = self.finished.close();
    }

    fn join_worker(&self, worker: JoinHandle<()>) {
        if worker.join().is_err() {
            warn!(id = %self.id, "connection worker panicked");
        }
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.socket.peer_addr()
    }

    /// Register an observer for the close notification.
    ///
    /// Observers added after the connection finished closing are never called.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Begin closing. A second call returns [`Error::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        self.shutdown.close()
    }

    /// Whether the connection has started closing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }

    /// Block until the socket is released and observers were notified.
    pub fn wait(&self) {
        self.finished.wait();
    }
}

struct Workers {
    reader: JoinHandle<()>,
    processor: JoinHandle<()>,
    writer: JoinHandle<()>,
    /// Disconnects once the write pump returns.
    drained: Receiver<()>,
}

/// On end of stream the pump only hangs up its sender, so the processor
/// still answers everything already read before the connection closes.
fn read_pump(
    socket: &StreamSocket,
    pool: &BufferPool,
    tx: &Sender<Buffer>,
    shutdown: &ShutdownSignal,
) {
    loop {
        let mut buffer = pool.acquire();
        let n = match socket.read(buffer.as_mut_slice()) {
            Ok(0) => {
                debug!(peer = %socket.peer_addr(), "peer closed stream");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                if !shutdown.is_closed() {
                    let err = Error::Io(err);
                    Metrics::record_error(&err);
                    debug!(peer = %socket.peer_addr(), error = %err, "read failed");
                }
                break;
            }
        };
        Metrics::record_bytes_read(n);
        buffer.set_len(n);

        select! {
            send(tx, buffer) -> res => if res.is_err() { break },
            recv(shutdown.receiver()) -> _ => break,
        }
    }

    let _ = shutdown.close();
}

fn process(
    mut reassembler: Reassembler<Box<dyn RequestHandler>>,
    rx: &Receiver<Buffer>,
    mut writer: ResponseWriter,
    shutdown: &ShutdownSignal,
) {
    loop {
        select! {
            recv(rx) -> msg => {
                let Ok(buffer) = msg else { break };
                let result = reassembler.feed(buffer.as_slice(), &mut writer);
                drop(buffer);
                if let Err(err) = result {
                    Metrics::record_error(&err);
                    if err.is_fatal() {
                        warn!(error = %err, "closing connection");
                    } else {
                        debug!(error = %err, "connection already closing");
                    }
                    break;
                }
            },
            recv(shutdown.receiver()) -> _ => break,
        }
    }

    let _ = shutdown.close();
}

/// Runs until the processor drops its sender, so every buffer it handed off
/// is written even after the shutdown signal fired.
fn write_pump(socket: &StreamSocket, rx: &Receiver<Buffer>, shutdown: &ShutdownSignal) {
    for buffer in rx {
        if let Err(err) = socket.write_once(buffer.as_slice()) {
            if !shutdown.is_closed() {
                Metrics::record_error(&err);
                debug!(peer = %socket.peer_addr(), error = %err, "write failed");
            }
            break;
        }
        Metrics::record_bytes_written(buffer.len());
    }

    let _ = shutdown.close();
}

/// Response writer handed to the handler on the processor thread.
///
/// Packs the response header and body into write-pool buffers and hands each
/// one to the write pump.
struct ResponseWriter {
    protocol: ProtocolId,
    pool: BufferPool,
    tx: Sender<Buffer>,
    shutdown: ShutdownSignal,
}

impl ResponseWriter {
    fn hand_off(&self, buffer: Buffer) -> Result<()> {
        select! {
            send(self.tx, buffer) -> res => res.map_err(|_| Error::ConnectionClosed),
            recv(self.shutdown.receiver()) -> _ => Err(Error::ConnectionClosed),
        }
    }
}

impl PackageWriter for ResponseWriter {
    fn write_package(&mut self, length: i64, body: &mut dyn Read) -> Result<()> {
        let header = self.protocol.header(length);
        let total = header.body_len()?;
        let mut remaining = total;

        let mut buffer = self.pool.acquire();
        buffer.as_mut_slice()[..HEADER_SIZE].copy_from_slice(&header.encode());
        let mut filled = HEADER_SIZE;

        loop {
            let capacity = buffer.capacity();
            while filled < capacity && remaining > 0 {
                let want = usize::try_from(remaining).map_or(capacity - filled, |r| {
                    r.min(capacity - filled)
                });
                let n = match body.read(&mut buffer.as_mut_slice()[filled..filled + want]) {
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                };
                if n == 0 {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "response body ended after {} of {total} bytes",
                            total - remaining
                        ),
                    )));
                }
                filled += n;
                remaining -= n as u64;
            }

            buffer.set_len(filled);
            self.hand_off(buffer)?;
            if remaining == 0 {
                break;
            }

            buffer = self.pool.acquire();
            filled = 0;
        }

        Metrics::record_response_sent();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use crate::protocol::PackageHeader;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn accept_pair(config: &TransportConfig) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let connection = Connection::spawn(server, config, Box::new(EchoHandler::new())).unwrap();
        (connection, client)
    }

    fn read_response(client: &mut TcpStream) -> (PackageHeader, Vec<u8>) {
        let mut raw = [0u8; HEADER_SIZE];
        client.read_exact(&mut raw).unwrap();
        let header = PackageHeader::decode(&raw).unwrap();
        let mut body = vec![0u8; usize::try_from(header.length()).unwrap()];
        client.read_exact(&mut body).unwrap();
        (header, body)
    }

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl ConnectionObserver for CountingObserver {
        fn connection_closed(&self, _id: ConnectionId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_echo_over_socket() {
        let (_connection, mut client) = accept_pair(&TransportConfig::default());
        let protocol = ProtocolId::default();

        client.write_all(&protocol.header(5).encode()).unwrap();
        client.write_all(b"hello").unwrap();

        let (header, body) = read_response(&mut client);
        assert_eq!(header.length(), 5);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_response_spans_several_write_buffers() {
        let config = TransportConfig {
            write_buffer_size: 24,
            read_buffer_size: 7,
            ..TransportConfig::default()
        };
        let (_connection, mut client) = accept_pair(&config);
        let body: Vec<u8> = (0..200u8).collect();

        client
            .write_all(&config.protocol.header(200).encode())
            .unwrap();
        client.write_all(&body).unwrap();

        let (header, echoed) = read_response(&mut client);
        assert_eq!(header.length(), 200);
        assert_eq!(echoed, body);
    }

    #[test]
    fn test_protocol_mismatch_closes_connection() {
        let (connection, mut client) = accept_pair(&TransportConfig::default());
        let observer = Arc::new(CountingObserver::default());
        connection.add_observer(observer.clone());

        client
            .write_all(&PackageHeader::new(0xDEAD, 1, 0).encode())
            .unwrap();

        connection.wait();
        assert!(connection.is_closed());
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_half_close_still_answers() {
        let (connection, mut client) = accept_pair(&TransportConfig::default());
        let protocol = ProtocolId::default();

        client.write_all(&protocol.header(4).encode()).unwrap();
        client.write_all(b"last").unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let (_, body) = read_response(&mut client);
        assert_eq!(body, b"last");
        connection.wait();
    }

    #[test]
    fn test_response_before_mismatch_is_flushed() {
        let (connection, mut client) = accept_pair(&TransportConfig::default());
        let protocol = ProtocolId::default();

        let mut bytes = protocol.header(2).encode().to_vec();
        bytes.extend_from_slice(b"ok");
        bytes.extend_from_slice(&PackageHeader::new(0xDEAD, 1, 0).encode());
        client.write_all(&bytes).unwrap();

        let (_, body) = read_response(&mut client);
        assert_eq!(body, b"ok");
        connection.wait();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (connection, _client) = accept_pair(&TransportConfig::default());

        assert!(connection.close().is_ok());
        assert!(matches!(connection.close(), Err(Error::AlreadyClosed)));
        connection.wait();
    }

    #[test]
    fn test_read_timeout_closes_idle_connection() {
        let config = TransportConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..TransportConfig::default()
        };
        let (connection, _client) = accept_pair(&config);

        connection.wait();
        assert!(connection.is_closed());
    }

    #[test]
    fn test_write_timeout_closes_stalled_connection() {
        let config = TransportConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..TransportConfig::default()
        };
        let (connection, mut client) = accept_pair(&config);
        let observer = Arc::new(CountingObserver::default());
        connection.add_observer(observer.clone());
        let before = crate::protocol::metrics_snapshot();

        // Far larger than loopback socket buffers, and the client never reads the echo.
        let body = vec![0x42u8; 32 * 1024 * 1024];
        client
            .write_all(&config.protocol.header(i64::try_from(body.len()).unwrap()).encode())
            .unwrap();
        client.write_all(&body).unwrap();

        connection.wait();
        assert!(connection.is_closed());
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
        assert!(crate::protocol::metrics_snapshot().io_errors > before.io_errors);
        drop(client);
    }

    #[test]
    fn test_peer_disconnect_closes_connection() {
        let (connection, client) = accept_pair(&TransportConfig::default());
        drop(client);

        connection.wait();
        assert!(connection.is_closed());
    }
}
