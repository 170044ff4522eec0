//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use intercept_proxy::audit::PassThrough;
use intercept_proxy::config::ProxyConfig;
use intercept_proxy::lifecycle::{self, RunningProxy, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const API_KEY: &str = "test-admin-key";

/// Start a keep-alive upstream that answers every request with `body`.
pub async fn start_mock_upstream(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut pending = Vec::new();
                        let mut buf = [0u8; 4096];
                        loop {
                            let n = match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n,
                            };
                            pending.extend_from_slice(&buf[..n]);
                            while let Some(end) = find_terminator(&pending) {
                                pending.drain(..end);
                                let response = format!(
                                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                                    body.len(),
                                    body
                                );
                                if socket.write_all(response.as_bytes()).await.is_err() {
                                    return;
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// An address with nothing listening on it.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Loopback config with ephemeral ports and the admin API on.
pub fn proxy_config(upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    config.timeouts.connect_secs = 1;
    config.admin.enabled = true;
    config.admin.bind_address = "127.0.0.1:0".into();
    config.admin.api_key = API_KEY.into();
    config
}

pub async fn start_proxy(config: ProxyConfig) -> (RunningProxy, Shutdown) {
    let shutdown = Shutdown::new();
    let proxy = lifecycle::start(config, Arc::new(PassThrough), &shutdown).await.unwrap();
    (proxy, shutdown)
}

pub fn response_for(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
}

/// Send one request and read exactly one expected-length response.
pub async fn round_trip(stream: &mut TcpStream, request: &[u8], expected_len: usize) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    let mut buf = vec![0u8; expected_len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("response timed out")
        .unwrap();
    buf
}

/// Read until EOF; a reset also counts as closed.
pub async fn closed_by_proxy(stream: &mut TcpStream) -> bool {
    let mut rest = Vec::new();
    match tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await {
        Ok(Ok(_)) => true,
        Ok(Err(_)) => true,
        Err(_) => false,
    }
}

pub fn admin_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
