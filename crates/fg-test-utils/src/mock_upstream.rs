//! Mock crawler event-stream endpoint.
//!
//! Serves `GET /events/{channel}` with a newline-framed JSON body, the same
//! wire contract the real crawler actor exposes.  Tests push frames through
//! [`MockUpstream::push_json`] and can sever all live connections with
//! [`MockUpstream::drop_connections`] to exercise reconnect paths.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// What a connected client asked for, captured at handshake time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub channel: String,
    pub token: Option<String>,
    /// The raw `users` query value, exactly as received; `None` when the
    /// parameter was absent.
    pub users: Option<String>,
}

#[derive(Debug, Clone)]
enum Directive {
    Line(String),
    Close,
}

#[derive(Clone)]
struct UpstreamState {
    tx: broadcast::Sender<Directive>,
    connections: Arc<AtomicUsize>,
    records: Arc<Mutex<Vec<ConnectionRecord>>>,
    handshake_status: Arc<Mutex<Option<u16>>>,
}

/// A mock crawler actor for integration testing.
pub struct MockUpstream {
    addr: SocketAddr,
    state: UpstreamState,
    _task: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    /// Bind to a random port and start serving.
    pub async fn start() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let state = UpstreamState {
            tx,
            connections: Arc::new(AtomicUsize::new(0)),
            records: Arc::new(Mutex::new(Vec::new())),
            handshake_status: Arc::new(Mutex::new(None)),
        };

        let app = Router::new()
            .route("/events/{channel}", get(events_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream addr");

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockUpstream {
            addr,
            state,
            _task: task,
        }
    }

    /// Base URL clients should point at, e.g. `http://127.0.0.1:41234`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Broadcast one JSON frame to every connected client.
    pub fn push_json(&self, frame: &serde_json::Value) {
        let _ = self.state.tx.send(Directive::Line(frame.to_string()));
    }

    /// Broadcast one raw line (may be malformed on purpose).
    pub fn push_line(&self, line: &str) {
        let _ = self.state.tx.send(Directive::Line(line.to_owned()));
    }

    /// End every live stream body, as a crashing crawler would.
    pub fn drop_connections(&self) {
        let _ = self.state.tx.send(Directive::Close);
    }

    /// Make subsequent handshakes return `status` instead of a stream.
    /// `None` restores normal behavior.
    pub fn set_handshake_status(&self, status: Option<u16>) {
        *self.state.handshake_status.lock().unwrap() = status;
    }

    /// Number of stream connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Handshake record of the most recent connection.
    pub fn last_connection(&self) -> Option<ConnectionRecord> {
        self.state.records.lock().unwrap().last().cloned()
    }
}

async fn events_handler(
    State(state): State<UpstreamState>,
    Path(channel): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(status) = *state.handshake_status.lock().unwrap() {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    // Subscribe before publishing the connection count, so a test that
    // waits on the count can push frames immediately afterwards.
    let rx = state.tx.subscribe();
    state.records.lock().unwrap().push(ConnectionRecord {
        channel,
        token: params.get("token").cloned(),
        users: params.get("users").cloned(),
    });
    state.connections.fetch_add(1, Ordering::SeqCst);
    let stream = BroadcastStream::new(rx)
        .take_while(|item| {
            let keep = !matches!(item, Ok(Directive::Close));
            futures_util::future::ready(keep)
        })
        .filter_map(|item| {
            let out = match item {
                Ok(Directive::Line(line)) => {
                    Some(Ok::<Bytes, std::convert::Infallible>(Bytes::from(
                        format!("{line}\n"),
                    )))
                }
                // Close is filtered by take_while; lagged receivers just
                // miss frames, as a slow real consumer would.
                _ => None,
            };
            futures_util::future::ready(out)
        });

    Body::from_stream(stream).into_response()
}
