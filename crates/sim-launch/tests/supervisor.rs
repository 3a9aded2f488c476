//! Supervisor and shutdown tests with real child processes.

#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sim_launch::{ProcessSupervisor, ServerConfig, ServerError, ShutdownCoordinator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Answer every connection with 200 OK, standing in for the server's
/// HTTP surface while the child itself is just a long sleep.
async fn spawn_alive_endpoint() -> (SocketAddr, JoinHandle<()>) {
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
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, task)
}

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn fast_config(base_url: String) -> ServerConfig {
    let mut config = ServerConfig::new(base_url);
    config.probe_timeout = Duration::from_millis(200);
    config.probe_interval = Duration::from_millis(50);
    config.startup_probe_budget = 5;
    config.graceful_timeout = Duration::from_millis(500);
    config.kill_wait = Duration::from_secs(2);
    config
}

fn sleeper_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.args(["-c", "sleep 30"]);
    cmd
}

#[tokio::test]
async fn test_start_times_out_and_kills_child() {
    let addr = closed_port().await;
    let mut supervisor =
        ProcessSupervisor::new(fast_config(format!("http://{addr}"))).unwrap();

    let err = supervisor.start(sleeper_command()).await.unwrap_err();
    assert!(matches!(err, ServerError::StartupTimeout { attempts: 5, .. }));
    // The half-started child must not outlive the attempt
    assert!(!supervisor.is_spawned());
}

#[tokio::test]
async fn test_start_detects_early_exit() {
    let addr = closed_port().await;
    let mut config = fast_config(format!("http://{addr}"));
    config.startup_probe_budget = 20;
    let mut supervisor = ProcessSupervisor::new(config).unwrap();

    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.args(["-c", "exit 3"]);

    let err = supervisor.start(cmd).await.unwrap_err();
    match err {
        ServerError::Exited { status } => assert_eq!(status.code(), Some(3)),
        other => panic!("expected Exited, got {other:?}"),
    }
    assert!(!supervisor.is_spawned());
}

#[tokio::test]
async fn test_start_returns_on_first_successful_probe() {
    let (addr, endpoint) = spawn_alive_endpoint().await;
    let mut supervisor =
        ProcessSupervisor::new(fast_config(format!("http://{addr}"))).unwrap();

    supervisor.start(sleeper_command()).await.unwrap();
    assert!(supervisor.is_spawned());

    supervisor.kill().await;
    assert!(!supervisor.is_spawned());
    endpoint.abort();
}

#[tokio::test]
async fn test_kill_is_idempotent() {
    let (addr, endpoint) = spawn_alive_endpoint().await;
    let mut supervisor =
        ProcessSupervisor::new(fast_config(format!("http://{addr}"))).unwrap();

    // Killing with nothing spawned is a no-op
    supervisor.kill().await;

    supervisor.start(sleeper_command()).await.unwrap();
    supervisor.kill().await;
    supervisor.kill().await;
    assert!(!supervisor.is_spawned());
    endpoint.abort();
}

#[tokio::test]
async fn test_shutdown_runs_exactly_once() {
    let graceful_addr = closed_port().await;
    let config = fast_config(format!("http://{graceful_addr}"));
    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(config.clone()).unwrap()));
    let coordinator = Arc::new(ShutdownCoordinator::new(supervisor, &config).unwrap());

    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move { coordinator.shutdown().await }));
    }

    let mut executed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            executed += 1;
        }
    }
    assert_eq!(executed, 1);
}

#[tokio::test]
async fn test_shutdown_kills_even_when_graceful_request_fails() {
    let (alive_addr, endpoint) = spawn_alive_endpoint().await;
    let start_config = fast_config(format!("http://{alive_addr}"));

    let mut supervisor = ProcessSupervisor::new(start_config).unwrap();
    supervisor.start(sleeper_command()).await.unwrap();
    let supervisor = Arc::new(Mutex::new(supervisor));

    // Point the graceful request at a port nothing listens on
    let graceful_addr = closed_port().await;
    let shutdown_config = fast_config(format!("http://{graceful_addr}"));
    let coordinator = ShutdownCoordinator::new(supervisor.clone(), &shutdown_config).unwrap();

    assert!(coordinator.shutdown().await);
    assert!(!supervisor.lock().await.is_spawned());
    endpoint.abort();
}
