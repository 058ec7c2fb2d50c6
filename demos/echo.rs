//! Echo server and client in one process.
//!
//! Run with `RUST_LOG=citron=debug cargo run --example echo` to watch the
//! connection lifecycle.

use citron::handler::echo_factory;
use citron::{Client, ClientConfig, Listener, TransportConfig, metrics_snapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> citron::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = TransportConfig::with_addr("127.0.0.1:0".parse().expect("loopback address"));
    let listener = Listener::bind(config, echo_factory())?;
    info!(addr = %listener.local_addr(), "echo listener ready");

    let mut client = Client::connect(listener.local_addr(), &ClientConfig::default())?;
    for message in ["ping", "hello, citron", ""] {
        let reply = client.call(message.as_bytes())?;
        info!(sent = message, received = %String::from_utf8_lossy(&reply), "round trip");
    }
    client.close()?;

    listener.close()?;

    let metrics = metrics_snapshot();
    info!(
        packages = metrics.packages_received,
        responses = metrics.responses_sent,
        bytes_read = metrics.bytes_read,
        bytes_written = metrics.bytes_written,
        "done"
    );
    Ok(())
}
