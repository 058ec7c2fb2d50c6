#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use citron::handler::HandlerFactory;
use citron::{HEADER_SIZE, Listener, PackageHeader, ProtocolId, TransportConfig};

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Listener on an ephemeral loopback port.
pub fn listen(factory: HandlerFactory) -> Listener {
    init_tracing();
    let config = TransportConfig::with_addr("127.0.0.1:0".parse().unwrap());
    Listener::bind(config, factory).expect("bind listener")
}

/// Header plus body in wire order.
pub fn package(protocol: ProtocolId, body: &[u8]) -> Vec<u8> {
    let mut bytes = protocol
        .header(i64::try_from(body.len()).unwrap())
        .encode()
        .to_vec();
    bytes.extend_from_slice(body);
    bytes
}

/// Raw stream with a read timeout so a broken server fails the test instead of hanging it.
pub fn raw_connect(listener: &Listener) -> TcpStream {
    let stream = TcpStream::connect(listener.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read one whole package off a raw stream.
pub fn read_package(stream: &mut TcpStream) -> (PackageHeader, Vec<u8>) {
    let mut raw = [0u8; HEADER_SIZE];
    stream.read_exact(&mut raw).expect("response header");
    let header = PackageHeader::decode(&raw).unwrap();
    let mut body = vec![0u8; usize::try_from(header.length()).unwrap()];
    stream.read_exact(&mut body).expect("response body");
    (header, body)
}

/// Write `bytes` and flush.
pub fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
    stream.flush().unwrap();
}

/// Poll `condition` until it holds or five seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// True once the peer has closed `stream`.
pub fn is_closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(n) => n == 0,
        Err(err) => matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
        ),
    }
}
