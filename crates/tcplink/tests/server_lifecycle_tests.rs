//! Start/stop, broadcast failure isolation and client lifecycle over loopback

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{
    DEADLINE, Inbox, connect_client, connect_clients, fast_config, start_server, wait_until,
};
use tcplink::{Client, ConnectionMode, LinkError, Server, TcpClient};
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_broadcast_isolates_a_failed_connection() {
    let server = start_server(ConnectionMode::Message).await;
    let clients = connect_clients(&server, 3).await;

    // Kill the server side of the middle connection
    let doomed = server.connections()[1].clone();
    doomed.disconnect().await.unwrap();

    let err = server.broadcast(b"payload").await.unwrap_err();
    let LinkError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.failures()[0].0, doomed.address());
    assert_eq!(aggregate.failures()[0].1, LinkError::NotConnected);
    assert!(aggregate.to_string().starts_with("there were problems broadcasting message"));

    // The failed connection was pruned by that same broadcast
    assert_eq!(server.connection_count(), 2);

    assert!(wait_until(WAIT, || {
        clients.iter().filter(|(_, inbox)| inbox.units().len() == 1).count() == 2
    })
    .await);

    // The next broadcast reaches exactly the survivors
    server.broadcast(b"again").await.unwrap();
    assert!(wait_until(WAIT, || {
        clients.iter().filter(|(_, inbox)| inbox.units().len() == 2).count() == 2
    })
    .await);
    for (_, inbox) in &clients {
        let units = inbox.units();
        if !units.is_empty() {
            assert_eq!(
                units,
                vec![Bytes::from_static(b"payload"), Bytes::from_static(b"again")]
            );
        }
    }

    for (client, _) in &clients {
        client.disconnect().await.unwrap();
    }
    server.stop().await.unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_client_that_left_is_pruned_on_next_broadcast() {
    let server = start_server(ConnectionMode::Stream).await;
    let clients = connect_clients(&server, 3).await;

    clients[0].0.disconnect().await.unwrap();
    assert!(wait_until(WAIT, || {
        server.connections().iter().filter(|c| c.is_connected()).count() == 2
    })
    .await);

    // The dead handle is still tracked, so this broadcast reports it once
    let err = server.broadcast(b"tick").await.unwrap_err();
    let LinkError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.failures()[0].1, LinkError::NotConnected);
    assert_eq!(server.connection_count(), 2);

    server.broadcast(b"tock").await.unwrap();
    assert_eq!(server.connection_count(), 2);

    for (client, _) in &clients[1..] {
        client.disconnect().await.unwrap();
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_clears_connections() {
    let server = start_server(ConnectionMode::Message).await;
    let clients = connect_clients(&server, 2).await;

    server.stop().await.unwrap();
    assert!(!server.is_running());
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.local_addr(), None);

    server.stop().await.unwrap();

    for (client, _) in &clients {
        assert!(wait_until(WAIT, || !client.is_connected()).await);
        client.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn test_shutdown_latency_is_bounded_by_deadline() {
    let server = start_server(ConnectionMode::Stream).await;
    let clients = connect_clients(&server, 3).await;

    let started = Instant::now();
    server.stop().await.unwrap();
    assert!(
        started.elapsed() < DEADLINE * 2,
        "stop took {:?}",
        started.elapsed()
    );

    let server = start_server(ConnectionMode::Stream).await;
    let client = connect_client(&server, &Inbox::default()).await;
    let started = Instant::now();
    client.disconnect().await.unwrap();
    assert!(
        started.elapsed() < DEADLINE * 2,
        "disconnect took {:?}",
        started.elapsed()
    );

    for (client, _) in &clients {
        client.disconnect().await.unwrap();
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_restarts_after_stop() {
    let server = start_server(ConnectionMode::Message).await;
    server.stop().await.unwrap();

    server.start().await.unwrap();
    assert!(server.is_running());

    let inbox = Inbox::default();
    let client = connect_client(&server, &inbox).await;
    assert!(wait_until(WAIT, || server.connection_count() == 1).await);
    server.broadcast(b"second run").await.unwrap();
    assert!(wait_until(WAIT, || inbox.units().len() == 1).await);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_dial_failure_reports_endpoint() {
    // Grab a free port, then close it again
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = TcpClient::with_config("127.0.0.1", port, ConnectionMode::Stream, fast_config());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, LinkError::Dial { .. }));
    assert!(err.to_string().starts_with("unable to dial TCP server"));
    assert!(!client.is_connected());
    assert_eq!(client.metrics().failed_connections, 1);
}

#[tokio::test]
async fn test_second_connect_is_rejected_while_live() {
    let server = start_server(ConnectionMode::Stream).await;
    let client = connect_client(&server, &Inbox::default()).await;

    assert!(matches!(
        client.connect().await,
        Err(LinkError::AlreadyConnected(_))
    ));
    assert!(client.is_connected());

    // Reconnecting after a disconnect works
    client.disconnect().await.unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_replaced_handler_receives_later_data() {
    let server = start_server(ConnectionMode::Message).await;
    let first = Inbox::default();
    let client = connect_client(&server, &first).await;
    assert!(wait_until(WAIT, || server.connection_count() == 1).await);

    server.broadcast(b"one").await.unwrap();
    assert!(wait_until(WAIT, || first.units().len() == 1).await);

    let second = Inbox::default();
    client.on_receive(second.handler());
    server.broadcast(b"two").await.unwrap();
    assert!(wait_until(WAIT, || second.units().len() == 1).await);

    assert_eq!(first.units(), vec![Bytes::from_static(b"one")]);
    assert_eq!(second.units(), vec![Bytes::from_static(b"two")]);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_recovers_after_read_loop_panic() {
    let server = start_server(ConnectionMode::Message).await;
    let port = server.local_addr().unwrap().port();

    let client = TcpClient::with_config("127.0.0.1", port, ConnectionMode::Message, fast_config());
    client.on_receive(Arc::new(|data: Bytes| {
        assert!(data.is_empty(), "handler failure");
    }));
    client.connect().await.unwrap();
    assert!(wait_until(WAIT, || server.connection_count() == 1).await);

    server.broadcast(b"boom").await.unwrap();

    // Once the loop has died the stale connection is replaced instead of rejected
    let inbox = Inbox::default();
    client.on_receive(inbox.handler());
    let deadline = Instant::now() + WAIT;
    loop {
        match client.connect().await {
            Ok(()) => break,
            Err(LinkError::AlreadyConnected(_)) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("reconnect failed: {e:?}"),
        }
    }
    assert!(client.is_connected());

    let metrics = client.metrics();
    assert_eq!(metrics.connections, 2);
    assert_eq!(metrics.active_connections, 1);

    assert!(
        wait_until(WAIT, || {
            server.connections().iter().filter(|c| c.is_connected()).count() == 1
        })
        .await
    );
    let _ = server.broadcast(b"after").await;
    assert!(wait_until(WAIT, || inbox.units().len() == 1).await);
    assert_eq!(inbox.units(), vec![Bytes::from_static(b"after")]);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}
