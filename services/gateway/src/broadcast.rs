//! Broadcast server: dashboard bundle, state/status JSON, realtime socket.
//!
//! Owns the bounded recent-event buffer.  Every dashboard-topic event is
//! appended to the buffer and fanned out to connected WebSocket clients; a
//! newly-connected client first receives one `state` frame seeding it with
//! the buffer, the subscription, counters and filters.  Connection-state
//! changes are pushed as `status` frames.
//!
//! Unknown GET paths outside `/api`, `/ws` and `/status` fall back to the
//! embedded dashboard bundle so client-side routes survive a refresh.

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use fg_protocol::{Channel, ConnectionState, DashboardFrame, Event};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::filter::FilterChain;
use crate::stats::Stats;
use crate::subscription::{SubscriptionError, SubscriptionManager, SubscriptionState};

/// Paths that must never fall through to the bundle.
const RESERVED_PREFIXES: [&str; 3] = ["/api", "/ws", "/status"];

/// Capacity of the recent-event buffer served to new clients.
pub const RECENT_CAPACITY: usize = 100;

#[cfg(feature = "embed-ui")]
#[derive(rust_embed::Embed)]
#[folder = "../../dashboard/build"]
struct DashboardAssets;

/// Callback into the stream core for runtime resubscription.
pub type SubscriptionUpdateFn = Arc<
    dyn Fn(Vec<Channel>, Vec<String>) -> BoxFuture<'static, Result<SubscriptionState, SubscriptionError>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    recent: Mutex<VecDeque<Event>>,
    stats: Arc<Stats>,
    subscription: Arc<SubscriptionManager>,
    filters: Arc<FilterChain>,
    conn_state: watch::Receiver<ConnectionState>,
    socket_tx: broadcast::Sender<Event>,
    update_subscription: SubscriptionUpdateFn,
}

impl DashboardState {
    pub fn new(
        stats: Arc<Stats>,
        subscription: Arc<SubscriptionManager>,
        filters: Arc<FilterChain>,
        conn_state: watch::Receiver<ConnectionState>,
        update_subscription: SubscriptionUpdateFn,
    ) -> Arc<Self> {
        let (socket_tx, _) = broadcast::channel(256);
        Arc::new(DashboardState {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            stats,
            subscription,
            filters,
            conn_state,
            socket_tx,
            update_subscription,
        })
    }

    /// Append to the recent buffer and fan out to connected sockets.
    /// Wired as the dashboard-topic subscriber.
    pub fn ingest(&self, event: Event) {
        {
            let mut recent = self.recent.lock().expect("recent buffer poisoned");
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        // No receivers just means no dashboards are connected.
        let _ = self.socket_tx.send(event);
    }

    /// Recent events, newest first.
    pub fn recent_events(&self) -> Vec<Event> {
        self.recent
            .lock()
            .expect("recent buffer poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    fn state_frame(&self) -> DashboardFrame {
        DashboardFrame::State {
            events: self.recent_events(),
            users: self.subscription.current().users,
            connection: *self.conn_state.borrow(),
            stats: self.stats.snapshot(),
            filters: self.filters.describe(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server handle
// ---------------------------------------------------------------------------

pub struct BroadcastServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BroadcastServer {
    /// Bind and serve.  Use port 0 in tests for an ephemeral port.
    pub async fn start(
        state: Arc<DashboardState>,
        bind: &str,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let app = router(state);
        let task = tokio::spawn(async move {
            let shutdown = async move {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        return;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "broadcast server exited with error");
            }
        });

        info!(addr = %local_addr, "broadcast server listening");
        Ok(BroadcastServer {
            local_addr,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("broadcast task slot poisoned").take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), task).await;
        }
    }
}

fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/api/state", get(state_handler))
        .route("/api/subscription", post(subscription_handler))
        .route("/ws", get(ws_handler))
        .fallback(bundle_handler)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn status_handler(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let stats = state.stats.snapshot();
    axum::Json(serde_json::json!({
        "connection": *state.conn_state.borrow(),
        "events": {
            "total": stats.total,
            "delivered": stats.delivered,
            "deduped": stats.deduped,
            "rate_per_minute": stats.rate_per_minute,
        },
    }))
}

async fn state_handler(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    axum::Json(state.state_frame())
}

#[derive(Debug, Deserialize)]
struct SubscriptionUpdateBody {
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    users: Vec<String>,
}

async fn subscription_handler(
    State(state): State<Arc<DashboardState>>,
    axum::Json(body): axum::Json<SubscriptionUpdateBody>,
) -> Response {
    let mut channels = Vec::with_capacity(body.channels.len());
    for name in &body.channels {
        match Channel::parse(name.trim()) {
            Some(c) => channels.push(c),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({ "error": format!("unknown channel '{name}'") })),
                )
                    .into_response();
            }
        }
    }

    match (state.update_subscription)(channels, body.users).await {
        Ok(new_state) => axum::Json(new_state).into_response(),
        Err(SubscriptionError::UpdateInProgress) => (
            StatusCode::CONFLICT,
            axum::Json(serde_json::json!({ "error": "update in progress" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<DashboardState>) {
    // Subscribe before seeding so nothing published around the handshake
    // is lost; an event racing the seed may reach the client twice, which
    // is harmless (clients key on primary_id).
    let mut events = state.socket_tx.subscribe();
    let mut conn_state = state.conn_state.clone();

    if send_frame(&mut socket, &state.state_frame()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_frame(&mut socket, &DashboardFrame::Event { event })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "dashboard client lagging; skipping missed events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = conn_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let connection = *conn_state.borrow_and_update();
                if send_frame(&mut socket, &DashboardFrame::Status { connection })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {} // inbound frames are ignored; the socket is push-only
                Some(Err(_)) => break,
            },
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &DashboardFrame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Bundle serving
// ---------------------------------------------------------------------------

async fn bundle_handler(method: Method, uri: Uri) -> Response {
    let raw_path = match fg_ui_http::screen_bundle_request(&method, &uri, &RESERVED_PREFIXES) {
        Ok(path) => path,
        Err(err) => return err.into_response(),
    };

    #[cfg(feature = "embed-ui")]
    {
        fg_ui_http::serve_bundle_asset::<DashboardAssets>(raw_path)
    }

    #[cfg(not(feature = "embed-ui"))]
    {
        let _ = raw_path;
        fg_ui_http::bundle_placeholder("feedgate")
    }
}
