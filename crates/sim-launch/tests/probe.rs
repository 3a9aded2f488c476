//! Liveness probe tests against real loopback sockets.

use std::net::SocketAddr;
use std::time::Duration;

use sim_launch::{probe, ServerError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve a fixed raw response to every connection.
async fn spawn_raw_server(response: &'static [u8]) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, task)
}

/// Reserve a loopback port that nothing is listening on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_probe_alive_server() {
    let (addr, server) = spawn_raw_server(
        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
    )
    .await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/server/alive");
    let alive = probe(&client, &url, Duration::from_secs(2)).await.unwrap();
    assert!(alive);

    server.abort();
}

#[tokio::test]
async fn test_probe_not_ready_server() {
    // Something answers, but not successfully: not alive, and not an error
    let (addr, server) = spawn_raw_server(
        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    )
    .await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/server/alive");
    let alive = probe(&client, &url, Duration::from_secs(2)).await.unwrap();
    assert!(!alive);

    server.abort();
}

#[tokio::test]
async fn test_probe_connection_refused_is_not_alive() {
    let addr = closed_port().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/server/alive");
    let alive = probe(&client, &url, Duration::from_secs(2)).await.unwrap();
    assert!(!alive);
}

#[tokio::test]
async fn test_probe_hung_server_times_out_as_not_alive() {
    // Accepts the connection but never responds
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/server/alive");
    let alive = probe(&client, &url, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(!alive);

    server.abort();
}

#[tokio::test]
async fn test_probe_malformed_response_propagates() {
    let (addr, server) = spawn_raw_server(b"this is not http at all\r\n\r\n").await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/server/alive");
    let result = probe(&client, &url, Duration::from_secs(2)).await;
    assert!(matches!(result, Err(ServerError::Probe(_))));

    server.abort();
}
