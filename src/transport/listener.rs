//! TCP listener owning the set of live connections.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, warn};

use super::config::TransportConfig;
use super::connection::{Connection, ConnectionId, ConnectionObserver};
use super::shutdown::ShutdownSignal;
use crate::handler::HandlerFactory;
use crate::protocol::{Error, Result};

/// Live connections keyed by identity.
///
/// Registered as the close observer of every connection it holds, so closed
/// connections drop out on their own.
#[derive(Debug, Default)]
struct Registry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    fn insert(&self, connection: Arc<Connection>) {
        self.lock().insert(connection.id(), connection);
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().remove(&id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn drain(&self) -> Vec<Arc<Connection>> {
        self.lock().drain().map(|(_, c)| c).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionObserver for Registry {
    fn connection_closed(&self, id: ConnectionId) {
        if self.remove(id).is_some() {
            debug!(%id, "connection unregistered");
        }
    }
}

/// Accepts connections and drives each one with a fresh handler.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    registry: Arc<Registry>,
    accept: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.registry.len())
            .field("closed", &self.shutdown.is_closed())
            .finish()
    }
}

impl Listener {
    /// Bind `config.listen_addr` and start accepting in the background.
    #[instrument(level = "info", skip_all, fields(addr = %config.listen_addr))]
    pub fn bind(config: TransportConfig, factory: HandlerFactory) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = ShutdownSignal::new();
        let registry = Arc::new(Registry::default());

        let accept = {
            let shutdown = shutdown.clone();
            let registry = Arc::clone(&registry);
            thread::Builder::new()
                .name("citron-accept".into())
                .spawn(move || accept_loop(&listener, &config, &factory, &registry, &shutdown))?
        };

        info!(%local_addr, "listening");
        Ok(Self {
            local_addr,
            shutdown,
            registry,
            accept: Mutex::new(Some(accept)),
        })
    }

    /// Bind and block until the accept loop terminates.
    pub fn serve(config: TransportConfig, factory: HandlerFactory) -> Result<()> {
        let listener = Self::bind(config, factory)?;
        let result = listener.wait();
        let _ = listener.close();
        result
    }

    /// Address actually bound (resolves port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of registered, not yet closed connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Block until the accept loop stops.
    ///
    /// Returns the loop's terminal error when this call is the one that
    /// joined it.
    pub fn wait(&self) -> Result<()> {
        self.shutdown.wait();
        self.join_accept()
    }

    /// Stop accepting, then close every registered connection.
    ///
    /// Returns once all connections released their sockets. A second call
    /// returns [`Error::AlreadyClosed`]. If the accept loop had already failed
    /// or panicked, its error is returned after the connections are closed.
    pub fn close(&self) -> Result<()> {
        self.shutdown.close()?;
        self.wake_accept();
        let accepted = self.join_accept();
        if let Err(err) = &accepted {
            warn!(error = %err, "accept loop ended with error");
        }

        let connections = self.registry.drain();
        for connection in &connections {
            let _ = connection.close();
        }
        for connection in &connections {
            connection.wait();
        }

        info!(addr = %self.local_addr, closed = connections.len(), "listener closed");
        accepted
    }

    fn wake_accept(&self) {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(err) = TcpStream::connect(addr) {
            debug!(%addr, error = %err, "accept wake-up connect failed");
        }
    }

    fn join_accept(&self) -> Result<()> {
        let handle = self
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle.map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(Error::Io(io::Error::other("accept thread panicked"))),
            None => Ok(()),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn accept_loop(
    listener: &TcpListener,
    config: &TransportConfig,
    factory: &HandlerFactory,
    registry: &Arc<Registry>,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_) if shutdown.is_closed() => return Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                continue;
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                let _ = shutdown.close();
                return Err(err.into());
            }
        };

        if shutdown.is_closed() {
            return Ok(());
        }

        if let Err(err) = register(stream, config, factory, registry) {
            warn!(%peer, error = %err, "failed to start connection");
        }
    }
}

fn register(
    stream: TcpStream,
    config: &TransportConfig,
    factory: &HandlerFactory,
    registry: &Arc<Registry>,
) -> Result<()> {
    let connection = Connection::new(stream, config)?;
    registry.insert(Arc::clone(&connection));
    connection.add_observer(Arc::clone(registry) as Arc<dyn ConnectionObserver>);

    if let Err(err) = connection.start(factory()) {
        registry.remove(connection.id());
        return Err(err);
    }
    Ok(())
}
