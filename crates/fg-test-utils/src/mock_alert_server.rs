//! Mock alert receiver.
//!
//! Accepts any method on any path, records the request, and answers with a
//! configurable status (200 by default).  One instance can impersonate a
//! Telegram API base, a Discord webhook, or a generic webhook target.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tokio::net::TcpListener;

/// One captured request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    /// Parsed JSON body; `Null` when the body was empty or not JSON.
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct AlertState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    respond_with: Arc<Mutex<u16>>,
}

/// A mock HTTP endpoint that records every delivery attempt.
pub struct MockAlertServer {
    addr: SocketAddr,
    state: AlertState,
    _task: tokio::task::JoinHandle<()>,
}

impl MockAlertServer {
    pub async fn start() -> Self {
        let state = AlertState {
            requests: Arc::new(Mutex::new(Vec::new())),
            respond_with: Arc::new(Mutex::new(200)),
        };

        let app = Router::new()
            .fallback(record_handler)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock alert server");
        let addr = listener.local_addr().expect("mock alert server addr");

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockAlertServer {
            addr,
            state,
            _task: task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Make subsequent requests fail (or succeed) with `status`.
    pub fn respond_with(&self, status: u16) {
        *self.state.respond_with.lock().unwrap() = status;
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn record_handler(
    State(state): State<AlertState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let parsed = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    let headers = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_owned(),
                v.to_str().unwrap_or_default().to_owned(),
            )
        })
        .collect();

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_owned(),
        headers,
        body: parsed,
    });

    let status = *state.respond_with.lock().unwrap();
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        axum::Json(serde_json::json!({ "ok": status < 300 })),
    )
}
