//! CONNECT tunnel tests.

use lucy::observability::{ClosedBy, Record};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

mod common;

use common::{connect, start_echo_server, start_proxy, test_config, unused_addr};

#[tokio::test]
async fn relays_bytes_unchanged_in_both_directions() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(test_config()).await;

    let (mut stream, head) = connect(proxy.addr, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    stream.write_all(&payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);

    drop(stream);
    let record = proxy.sink.wait_for(|r| matches!(r, Record::Tunnel(_))).await;
    let Record::Tunnel(tunnel) = record else { unreachable!() };
    assert_eq!(tunnel.host, echo.to_string());
    assert_eq!(tunnel.closed_by, ClosedBy::Client);
}

#[tokio::test]
async fn target_close_ends_session() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = target.accept().await.unwrap();
        socket.write_all(b"bye").await.unwrap();
    });

    let proxy = start_proxy(test_config()).await;
    let (mut stream, head) = connect(proxy.addr, &target_addr.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"bye");

    let record = proxy.sink.wait_for(|r| matches!(r, Record::Tunnel(_))).await;
    let Record::Tunnel(tunnel) = record else { unreachable!() };
    assert_eq!(tunnel.closed_by, ClosedBy::Target);
}

#[tokio::test]
async fn unreachable_target_is_bad_gateway() {
    let target = unused_addr().await;
    let proxy = start_proxy(test_config()).await;

    let (_stream, response) = connect(proxy.addr, &target.to_string()).await;
    assert!(response.starts_with("HTTP/1.1 502"), "{response}");
    assert!(
        response.contains(&format!("Failed to connect to target {target}")),
        "{response}"
    );

    let record = proxy.sink.wait_for(|r| matches!(r, Record::Failure(_))).await;
    let Record::Failure(failure) = record else { unreachable!() };
    assert_eq!(failure.method, "CONNECT");
    assert_eq!(failure.status, 502);
    assert!(proxy
        .sink
        .records()
        .iter()
        .all(|r| !matches!(r, Record::Tunnel(_))));
}

#[tokio::test]
async fn target_without_port_is_rejected() {
    let proxy = start_proxy(test_config()).await;

    let (_stream, response) = connect(proxy.addr, "example.test").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.contains("Invalid request URL"), "{response}");
}

#[tokio::test]
async fn half_close_delivers_late_replies() {
    // Target reads until EOF, then answers.
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = target.accept().await.unwrap();
        let mut request = Vec::new();
        socket.read_to_end(&mut request).await.unwrap();
        socket.write_all(&request).await.unwrap();
    });

    let mut config = test_config();
    config.tunnel.relay = lucy::config::RelayMode::HalfClose;
    let proxy = start_proxy(config).await;

    let (mut stream, head) = connect(proxy.addr, &target_addr.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    stream.write_all(b"question").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"question");

    let record = proxy.sink.wait_for(|r| matches!(r, Record::Tunnel(_))).await;
    let Record::Tunnel(tunnel) = record else { unreachable!() };
    assert_eq!(tunnel.closed_by, ClosedBy::Both);
}
