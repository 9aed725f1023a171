//! Write failures against peers that reset the connection

mod common;

use std::time::Duration;

use common::{ServerInbox, fast_config, start_server, wait_until};
use tcplink::{Client, ConnectionMode, LinkError, Server, TcpClient};
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(2);

/// Closes `peer` with an RST instead of a FIN.
fn reset(peer: TcpStream) {
    peer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);
    // Block without yielding: the reset reaches the socket before any read loop
    // gets a chance to poll it, so the next write is the first to see it.
    std::thread::sleep(Duration::from_millis(50));
}

#[tokio::test]
async fn test_client_disconnects_after_failed_send() {
    common::init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = TcpClient::with_config("127.0.0.1", port, ConnectionMode::Stream, fast_config());
    client.connect().await.unwrap();
    let (peer, _) = listener.accept().await.unwrap();
    reset(peer);

    let err = client.send(b"into the void").await.unwrap_err();
    assert!(matches!(err, LinkError::SendFailed(_)), "got {err:?}");
    assert!(!client.is_connected());
    assert_eq!(client.metrics().failed_connections, 1);

    assert_eq!(client.send(b"again").await, Err(LinkError::NotConnected));
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_disconnects_and_prunes_reset_peer() {
    let server = start_server(ConnectionMode::Message).await;
    let server_inbox = ServerInbox::default();
    server.on_receive(server_inbox.handler());
    let port = server.local_addr().unwrap().port();

    let peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert!(wait_until(WAIT, || server.connection_count() == 1).await);
    let tracked = server.connections()[0].clone();
    reset(peer);

    let err = server.broadcast(b"anyone there").await.unwrap_err();
    let LinkError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.failures()[0].0, tracked.address());
    assert!(
        matches!(aggregate.failures()[0].1, LinkError::SendFailed(_)),
        "got {:?}",
        aggregate.failures()[0].1
    );

    assert!(!tracked.is_connected());
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.metrics().failed_connections, 1);
    assert!(server_inbox.units().is_empty());

    server.stop().await.unwrap();
}
