//! Health and readiness probe server.
//!
//! Runs on its own port, away from the broadcast server, so orchestrators
//! can probe the process even when the dashboard surface is disabled:
//! - `GET /healthz` always returns 200 while the process runs
//! - `GET /readyz` returns 200 once config + pipeline + sinks are started,
//!   503 with a reason otherwise
//!
//! Upstream connectivity deliberately does NOT affect readiness: a gateway
//! riding out a crawler outage is still ready.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Readiness tracking
// ---------------------------------------------------------------------------

/// Local-subsystem readiness for `/readyz`.
#[derive(Debug, Clone)]
pub struct Readiness {
    ready: bool,
    reason: Option<String>,
}

impl Readiness {
    pub fn ready() -> Self {
        Readiness {
            ready: true,
            reason: None,
        }
    }

    pub fn not_ready(reason: String) -> Self {
        Readiness {
            ready: false,
            reason: Some(reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

// ---------------------------------------------------------------------------
// Server handle
// ---------------------------------------------------------------------------

/// Handle to the running health server.
pub struct HealthServer {
    local_addr: SocketAddr,
    readiness: Arc<Mutex<Readiness>>,
}

impl HealthServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bind `addr` and start answering probes in a background task.
    pub async fn start(addr: &str, readiness: Readiness) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let readiness = Arc::new(Mutex::new(readiness));

        let shared = readiness.clone();
        tokio::spawn(async move {
            run_server(listener, shared).await;
        });

        Ok(HealthServer {
            local_addr,
            readiness,
        })
    }

    /// Flip readiness at runtime (e.g. once the pipeline is wired, or
    /// during shutdown drain).
    pub async fn set_readiness(&self, readiness: Readiness) {
        *self.readiness.lock().await = readiness;
    }
}

// ---------------------------------------------------------------------------
// Accept loop + request handling
// ---------------------------------------------------------------------------

async fn run_server(listener: TcpListener, readiness: Arc<Mutex<Readiness>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let readiness = readiness.clone();
                tokio::spawn(async move {
                    handle_connection(stream, readiness).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, readiness: Arc<Mutex<Readiness>>) {
    // A probe request fits comfortably in one read.
    let mut buf = vec![0u8; 2048];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };

    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => {
            send_response(&mut stream, 400, "Bad Request").await;
            return;
        }
    };

    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/healthz") => send_response(&mut stream, 200, "ok").await,
        ("GET", "/readyz") => {
            let r = readiness.lock().await;
            if r.is_ready() {
                send_response(&mut stream, 200, "ready").await;
            } else {
                let reason = r.reason.clone().unwrap_or_else(|| "not ready".to_owned());
                send_response(&mut stream, 503, &reason).await;
            }
        }
        _ => send_response(&mut stream, 404, "Not Found").await,
    }
}

async fn send_response(stream: &mut TcpStream, status: u16, body: &str) {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn probe(addr: SocketAddr, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        let status = response
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|c| c.parse().ok())
            .expect("status code");
        (status, response)
    }

    #[tokio::test]
    async fn healthz_is_always_200() {
        let server = HealthServer::start("127.0.0.1:0", Readiness::not_ready("starting".to_owned()))
            .await
            .expect("start");
        let (status, _) = probe(server.local_addr(), "/healthz").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn readyz_reflects_readiness_transitions() {
        let server = HealthServer::start("127.0.0.1:0", Readiness::not_ready("starting".to_owned()))
            .await
            .expect("start");

        let (status, body) = probe(server.local_addr(), "/readyz").await;
        assert_eq!(status, 503);
        assert!(body.contains("starting"));

        server.set_readiness(Readiness::ready()).await;
        let (status, _) = probe(server.local_addr(), "/readyz").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let server = HealthServer::start("127.0.0.1:0", Readiness::ready())
            .await
            .expect("start");
        let (status, _) = probe(server.local_addr(), "/metrics").await;
        assert_eq!(status, 404);
    }
}
