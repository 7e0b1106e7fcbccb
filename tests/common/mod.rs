//! Shared fixtures: in-process fake proxies, a fake geolocation service and
//! scripted inspectors.

#![allow(dead_code)]

use async_trait::async_trait;
use proxy_checker::proxy::{Enrichment, Outcome, Task};
use proxy_checker::scheduler::Inspector;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const BERLIN_JSON: &str =
    r#"{"status":"success","country":"Germany","city":"Berlin","query":"5.6.7.8"}"#;

/// Answers every HTTP request with `body`. Works as a forward HTTP proxy for
/// plain-http URLs and as a stand-in geolocation service.
pub async fn spawn_http_responder(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = serve_http(stream, body).await;
            });
        }
    });
    addr
}

/// No-auth SOCKS5 server that ignores the requested target and answers the
/// tunnelled HTTP request itself.
pub async fn spawn_socks5_responder(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = serve_socks5(stream, body).await;
            });
        }
    });
    addr
}

/// Accepts connections and never answers
pub async fn spawn_silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// A local port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn serve_http(mut stream: TcpStream, body: &str) -> io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn serve_socks5(mut stream: TcpStream, body: &str) -> io::Result<()> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[0x05, 0x00]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let addr_len = match request[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "bad address type")),
    };
    let mut target = vec![0u8; addr_len + 2];
    stream.read_exact(&mut target).await?;

    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    serve_http(stream, body).await
}

pub fn berlin() -> Enrichment {
    Enrichment {
        city: "Berlin".to_string(),
        country: "Germany".to_string(),
        external_ip: "5.6.7.8".parse().unwrap(),
    }
}

/// Inspector that sleeps, tracks concurrency and reports every task working.
#[derive(Default)]
pub struct CountingInspector {
    pub delay: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: AtomicUsize,
    pub inspected: AtomicUsize,
}

impl CountingInspector {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn inspected(&self) -> usize {
        self.inspected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inspector for CountingInspector {
    async fn inspect(&self, _task: &Task) -> Outcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inspected.fetch_add(1, Ordering::SeqCst);
        Outcome::working(120, berlin())
    }
}

/// Inspector that fails every task
pub struct FailingInspector;

#[async_trait]
impl Inspector for FailingInspector {
    async fn inspect(&self, _task: &Task) -> Outcome {
        Outcome::failed()
    }
}
