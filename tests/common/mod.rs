//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_dispatch::config::ClientConfig;
use resilient_dispatch::error::Failure;
use resilient_dispatch::http::{ConcreteRequest, Response};
use resilient_dispatch::load_balancer::EndpointSpec;
use resilient_dispatch::transport::{transport_fn, Transport};

/// Read the request head (we only send bodiless requests in tests).
async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the raw request head and returns status, extra headers and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<(&'static str, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let (status, headers, body) = f(head).await;
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");

                        let mut response = format!(
                            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            body.len()
                        );
                        for (name, value) in headers {
                            response.push_str(&format!("{name}: {value}\r\n"));
                        }
                        response.push_str("\r\n");
                        response.push_str(&body);

                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend that always returns `200` with a fixed body.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_head| async move { (200, Vec::new(), body.to_string()) }).await
}

/// What a recording transport keeps of each request.
#[derive(Clone, Debug)]
pub struct Seen {
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
    pub attempt: u32,
}

/// Requests seen by a recording transport, in arrival order.
#[derive(Clone, Default)]
pub struct Recorded(Arc<Mutex<Vec<Seen>>>);

impl Recorded {
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }

    /// Number of requests sent to `host:port`.
    pub fn count_for(&self, authority: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.uri.authority().map(|a| a.as_str()) == Some(authority))
            .count()
    }
}

/// In-process transport that records every request and answers with `respond`.
pub fn recording_transport<F>(respond: F) -> (impl Transport, Recorded)
where
    F: Fn(&ConcreteRequest, usize) -> Result<Response, Failure> + Send + Sync + 'static,
{
    let recorded = Recorded::default();
    let sink = recorded.clone();
    let transport = transport_fn(move |request: ConcreteRequest| {
        let n = {
            let mut seen = sink.0.lock().unwrap();
            seen.push(Seen {
                uri: request.uri().clone(),
                headers: request.headers().clone(),
                attempt: request.attempt(),
            });
            seen.len()
        };
        let outcome = respond(&request, n);
        async move { outcome }
    });
    (transport, recorded)
}

pub fn status(code: u16) -> Result<Response, Failure> {
    Ok(Response::with_status(StatusCode::from_u16(code).unwrap(), ""))
}

pub fn json_ok(body: &'static str) -> Result<Response, Failure> {
    Ok(Response::with_status(StatusCode::OK, body))
}

/// Client config against one fixed base URL with immediate retries.
pub fn direct_config(base: &str) -> ClientConfig {
    let mut config = ClientConfig {
        name: "users".into(),
        base_url: Some(base.parse().unwrap()),
        ..ClientConfig::default()
    };
    config.retry.period_ms = 0;
    config
}

/// Client config load-balancing over `endpoints` with immediate retries.
pub fn balanced_config(endpoints: &[&str]) -> ClientConfig {
    let mut config = ClientConfig {
        name: "users".into(),
        endpoints: endpoints
            .iter()
            .map(|url| EndpointSpec::new(url.parse().unwrap()))
            .collect(),
        ..ClientConfig::default()
    };
    config.retry.period_ms = 0;
    config
}
