mod common;

use citron::handler::echo_factory;
use citron::{Client, ClientConfig, Error, PackageHeader, ProtocolId, VERSION};

use common::{eventually, is_closed_by_peer, listen, package, raw_connect, write_raw};

#[test]
fn wrong_magic_closes_only_that_connection() {
    let listener = listen(echo_factory());
    let mut healthy = Client::connect(listener.local_addr(), &ClientConfig::default()).unwrap();
    assert_eq!(&healthy.call(b"before").unwrap()[..], b"before");

    let mut rogue = raw_connect(&listener);
    write_raw(&mut rogue, &PackageHeader::new(0xDEAD, VERSION, 4).encode());
    assert!(is_closed_by_peer(&mut rogue));

    assert_eq!(&healthy.call(b"after").unwrap()[..], b"after");
    assert!(eventually(|| listener.connection_count() == 1));
}

#[test]
fn wrong_version_closes_connection() {
    let protocol = ProtocolId::default();
    let listener = listen(echo_factory());
    let mut rogue = raw_connect(&listener);

    let mut bytes = package(protocol, b"ok");
    bytes.extend_from_slice(&PackageHeader::new(protocol.magic_code, VERSION + 1, 0).encode());
    write_raw(&mut rogue, &bytes);

    let (_, body) = common::read_package(&mut rogue);
    assert_eq!(body, b"ok");
    assert!(is_closed_by_peer(&mut rogue));
}

#[test]
fn disconnect_unregisters_connection() {
    let listener = listen(echo_factory());

    let clients: Vec<Client> = (0..4)
        .map(|_| Client::connect(listener.local_addr(), &ClientConfig::default()).unwrap())
        .collect();
    assert!(eventually(|| listener.connection_count() == 4));

    for client in clients {
        client.close().unwrap();
    }
    assert!(eventually(|| listener.connection_count() == 0));
}

#[test]
fn listener_close_tears_down_live_connections() {
    let listener = listen(echo_factory());
    let mut client = Client::connect(listener.local_addr(), &ClientConfig::default()).unwrap();
    assert_eq!(&client.call(b"live").unwrap()[..], b"live");

    listener.close().unwrap();
    assert_eq!(listener.connection_count(), 0);
    assert!(client.call(b"gone").is_err());
    assert!(matches!(listener.close(), Err(Error::AlreadyClosed)));
}

#[test]
fn client_mismatch_fails_that_call_only() {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let peer = std::thread::spawn(move || {
        let (mut stream, _) = server.accept().unwrap();
        let mut reply = PackageHeader::new(0x0BAD, VERSION, 0).encode().to_vec();
        reply.extend(package(ProtocolId::default(), b"fine"));
        stream.write_all(&reply).unwrap();
        let _ = stream.read(&mut [0u8; 1]);
    });

    let mut client = Client::connect(addr, &ClientConfig::default()).unwrap();
    assert!(matches!(
        client.receive(),
        Err(Error::ProtocolMismatch { field: "magic_code", .. })
    ));
    let body = client.receive().unwrap().read_to_bytes().unwrap();
    assert_eq!(&body[..], b"fine");

    client.close().unwrap();
    peer.join().unwrap();
}

#[test]
fn metrics_track_traffic() {
    let listener = listen(echo_factory());
    let before = citron::metrics_snapshot();

    let mut client = Client::connect(listener.local_addr(), &ClientConfig::default()).unwrap();
    client.call(b"counted").unwrap();

    assert!(eventually(|| {
        let after = citron::metrics_snapshot();
        after.packages_received > before.packages_received
            && after.responses_sent > before.responses_sent
            && after.connections_opened > before.connections_opened
    }));
}
