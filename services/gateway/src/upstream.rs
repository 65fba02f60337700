//! Self-healing stream client for the crawler actor.
//!
//! Maintains a single HTTP connection to `{base}/events/{channel}` and
//! feeds newline-framed JSON documents into the pipeline channel.  The
//! connection recovers from transport errors with exponential backoff and
//! jitter; repeated immediate drops and handshake rejections are classified
//! fatal, after which the client parks in `disconnected` until the
//! selection changes (a runtime resubscription revives it).
//!
//! Multiple selected channels ride the server-multiplexed `all` endpoint
//! with client-side channel gating, so per-connection ordering is
//! preserved and channel-set updates keep a single connection.

use fg_protocol::{Channel, ConnectionState, EventKind, RawFrame};
use futures_util::StreamExt;
use rand::Rng;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Below this connection lifetime a drop counts as "immediate".
const QUICK_DROP_WINDOW: Duration = Duration::from_secs(1);
/// Consecutive immediate drops before the stream is declared fatal.
const QUICK_DROP_LIMIT: u32 = 3;
/// How long a subscription update may wait for the new connection.
const UPDATE_DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Crawler base URL, e.g. `http://crawler.internal:8787`.
    pub base_url: String,
    /// Query-string token; registered with the log sanitizer by the
    /// config loader.
    pub token: String,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// `min(max_delay, initial × multiplier^attempt)`, jittered ±20%.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis((capped * jitter) as u64)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream rejected the subscription: {0}")]
    Rejected(String),
    #[error("subscription update timed out")]
    UpdateTimeout,
    #[error("upstream client is stopped")]
    Stopped,
}

// ---------------------------------------------------------------------------
// Selection plumbing
// ---------------------------------------------------------------------------

/// What the client should be subscribed to, stamped with a generation so
/// updates can await their own application.
#[derive(Debug, Clone)]
struct SelectionCmd {
    generation: u64,
    channels: Vec<Channel>,
    users: Vec<String>,
}

#[derive(Debug, Clone)]
struct AppliedUpdate {
    generation: u64,
    ok: bool,
    detail: String,
}

// ---------------------------------------------------------------------------
// Client handle
// ---------------------------------------------------------------------------

/// Handle to the running stream task.
pub struct UpstreamClient {
    selection_tx: watch::Sender<SelectionCmd>,
    applied_rx: watch::Receiver<AppliedUpdate>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    next_gen: AtomicU64,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamClient {
    /// Spawn the stream task with an initial selection.  Returns the handle
    /// and the raw-frame receiver the pipeline consumes.
    pub fn start(
        cfg: UpstreamConfig,
        channels: Vec<Channel>,
        users: Vec<String>,
    ) -> (Self, mpsc::Receiver<RawFrame>) {
        let (frame_tx, frame_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (selection_tx, selection_rx) = watch::channel(SelectionCmd {
            generation: 0,
            channels,
            users,
        });
        let (applied_tx, applied_rx) = watch::channel(AppliedUpdate {
            // Sentinel below any real generation so generation 0 can be awaited.
            generation: u64::MAX,
            ok: true,
            detail: String::new(),
        });

        let task = tokio::spawn(run_loop(
            cfg,
            frame_tx,
            state_tx,
            selection_rx,
            applied_tx,
            shutdown_rx,
        ));

        (
            UpstreamClient {
                selection_tx,
                applied_rx,
                state_rx,
                shutdown_tx,
                next_gen: AtomicU64::new(0),
                task: Mutex::new(Some(task)),
            },
            frame_rx,
        )
    }

    /// Watch the connection-state signal.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Renegotiate the upstream subscription and wait for the new
    /// connection (or the idle state, for an empty channel set).
    ///
    /// Serialization against concurrent updates is the subscription
    /// manager's job; this method only talks to the stream task.
    pub async fn update_selection(
        &self,
        channels: Vec<Channel>,
        users: Vec<String>,
    ) -> Result<(), UpstreamError> {
        let generation = self.next_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let mut applied_rx = self.applied_rx.clone();

        self.selection_tx
            .send(SelectionCmd {
                generation,
                channels,
                users,
            })
            .map_err(|_| UpstreamError::Stopped)?;

        let wait = async {
            loop {
                {
                    let applied = applied_rx.borrow_and_update();
                    if applied.generation != u64::MAX && applied.generation >= generation {
                        if applied.ok {
                            return Ok(());
                        }
                        return Err(UpstreamError::Rejected(applied.detail.clone()));
                    }
                }
                if applied_rx.changed().await.is_err() {
                    return Err(UpstreamError::Stopped);
                }
            }
        };
        tokio::time::timeout(UPDATE_DEADLINE, wait)
            .await
            .map_err(|_| UpstreamError::UpdateTimeout)?
    }

    /// Cancel the stream task and wait briefly for it to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("upstream task slot poisoned").take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Build the stream URL.  Exactly one channel goes on the path; more than
/// one selects the multiplexed `all` endpoint.  The `users` parameter is
/// omitted entirely when the set is empty.
fn build_events_url(
    base_url: &str,
    channels: &[Channel],
    users: &[String],
    token: &str,
) -> Result<reqwest::Url, String> {
    let channel = match channels {
        [single] => *single,
        _ => Channel::All,
    };
    let mut url = reqwest::Url::parse(&format!(
        "{}/events/{}",
        base_url.trim_end_matches('/'),
        channel.as_str()
    ))
    .map_err(|e| e.to_string())?;
    url.query_pairs_mut().append_pair("token", token);
    if !users.is_empty() {
        url.query_pairs_mut().append_pair("users", &users.join(","));
    }
    Ok(url)
}

/// Client-side gate for the multiplexed connection: drop frames whose
/// known kind maps to an unselected channel.  Unknown kinds pass through
/// so the normalizer can count and log the rejection.
fn frame_passes_gate(frame: &RawFrame, channels: &[Channel]) -> bool {
    if channels.len() <= 1 || channels.contains(&Channel::All) {
        return true;
    }
    match EventKind::parse(&frame.event_type) {
        Some(kind) => channels.contains(&kind.channel()),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Stream task
// ---------------------------------------------------------------------------

enum ReadOutcome {
    SelectionChanged,
    Shutdown,
    Ended,
}

async fn run_loop(
    cfg: UpstreamConfig,
    frame_tx: mpsc::Sender<RawFrame>,
    state_tx: watch::Sender<ConnectionState>,
    mut selection_rx: watch::Receiver<SelectionCmd>,
    applied_tx: watch::Sender<AppliedUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build upstream HTTP client");
            return;
        }
    };

    let mut attempt: u32 = 0;
    let mut quick_drops: u32 = 0;

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let cmd = selection_rx.borrow_and_update().clone();

        // Idle: zero channels means no connection, on purpose.
        if cmd.channels.is_empty() {
            set_state(&state_tx, ConnectionState::Disconnected);
            ack(&applied_tx, cmd.generation, true, "");
            attempt = 0;
            quick_drops = 0;
            info!("upstream idle: no channels selected");
            tokio::select! {
                _ = selection_rx.changed() => continue 'outer,
                _ = shutdown_rx.changed() => continue 'outer,
            }
        }

        set_state(
            &state_tx,
            if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            },
        );

        let url = match build_events_url(&cfg.base_url, &cmd.channels, &cmd.users, &cfg.token) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "invalid upstream URL");
                ack(&applied_tx, cmd.generation, false, &e);
                fatal_park(&state_tx, &mut selection_rx, &mut shutdown_rx).await;
                attempt = 0;
                quick_drops = 0;
                continue 'outer;
            }
        };

        let connect = client.get(url.clone()).send();
        let resp = tokio::select! {
            r = connect => r,
            _ = selection_rx.changed() => continue 'outer,
            _ = shutdown_rx.changed() => continue 'outer,
        };

        match resp {
            Ok(resp) if resp.status().is_success() => {
                info!(channel = %url.path(), "upstream connected");
                set_state(&state_tx, ConnectionState::Connected);
                ack(&applied_tx, cmd.generation, true, "");
                attempt = 0;

                let connected_at = tokio::time::Instant::now();
                let outcome = read_stream(
                    resp,
                    &frame_tx,
                    &cmd.channels,
                    &mut selection_rx,
                    &mut shutdown_rx,
                )
                .await;

                match outcome {
                    ReadOutcome::SelectionChanged => {
                        quick_drops = 0;
                        continue 'outer;
                    }
                    ReadOutcome::Shutdown => break 'outer,
                    ReadOutcome::Ended => {
                        if *shutdown_rx.borrow() {
                            break 'outer;
                        }
                        if connected_at.elapsed() < QUICK_DROP_WINDOW {
                            quick_drops += 1;
                        } else {
                            quick_drops = 0;
                        }
                        if quick_drops >= QUICK_DROP_LIMIT {
                            error!(
                                drops = quick_drops,
                                "upstream dropping immediately after connect; treating as auth failure"
                            );
                            fatal_park(&state_tx, &mut selection_rx, &mut shutdown_rx).await;
                            attempt = 0;
                            quick_drops = 0;
                            continue 'outer;
                        }
                        warn!("upstream stream ended; reconnecting");
                    }
                }
            }
            Ok(resp) => {
                // Non-2xx handshake is classified fatal (auth or routing).
                let status = resp.status();
                error!(%status, "upstream handshake rejected");
                ack(
                    &applied_tx,
                    cmd.generation,
                    false,
                    &format!("handshake returned {status}"),
                );
                fatal_park(&state_tx, &mut selection_rx, &mut shutdown_rx).await;
                attempt = 0;
                quick_drops = 0;
                continue 'outer;
            }
            Err(e) => {
                warn!(error = %e, attempt, "upstream connect failed");
            }
        }

        // Transient failure path: back off, up to the attempt cap.
        attempt += 1;
        if attempt >= cfg.reconnect.max_attempts {
            error!(
                attempts = attempt,
                "upstream unreachable after maximum reconnect attempts"
            );
            ack(&applied_tx, cmd.generation, false, "max reconnect attempts exhausted");
            fatal_park(&state_tx, &mut selection_rx, &mut shutdown_rx).await;
            attempt = 0;
            quick_drops = 0;
            continue 'outer;
        }
        set_state(&state_tx, ConnectionState::Reconnecting);
        let delay = cfg.reconnect.delay_for_attempt(attempt - 1);
        let delay_ms = delay.as_millis() as u64;
        debug!(delay_ms, attempt, "backing off before reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = selection_rx.changed() => continue 'outer,
            _ = shutdown_rx.changed() => continue 'outer,
        }
    }

    set_state(&state_tx, ConnectionState::Disconnected);
    info!("upstream client stopped");
}

/// Consume the streaming body line by line until it ends or an external
/// signal interrupts.
async fn read_stream(
    resp: reqwest::Response,
    frame_tx: &mpsc::Sender<RawFrame>,
    channels: &[Channel],
    selection_rx: &mut watch::Receiver<SelectionCmd>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return ReadOutcome::Shutdown;
                }
            }
            _ = selection_rx.changed() => return ReadOutcome::SelectionChanged,
            chunk = stream.next() => match chunk {
                None => return ReadOutcome::Ended,
                Some(Err(e)) => {
                    warn!(error = %e, "upstream read error");
                    return ReadOutcome::Ended;
                }
                Some(Ok(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        if !handle_line(&line[..line.len() - 1], frame_tx, channels).await {
                            // Pipeline receiver is gone; shut the read down.
                            return ReadOutcome::Shutdown;
                        }
                    }
                }
            }
        }
    }
}

/// Parse one frame line and forward it.  Returns false only when the
/// pipeline receiver has been dropped.
async fn handle_line(line: &[u8], frame_tx: &mpsc::Sender<RawFrame>, channels: &[Channel]) -> bool {
    let text = match std::str::from_utf8(line) {
        Ok(t) => t.trim(),
        Err(_) => {
            warn!("skipping non-UTF-8 frame");
            return true;
        }
    };
    if text.is_empty() {
        return true;
    }
    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "skipping malformed frame");
            return true;
        }
    };
    if !frame_passes_gate(&frame, channels) {
        return true;
    }
    frame_tx.send(frame).await.is_ok()
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    });
}

fn ack(applied_tx: &watch::Sender<AppliedUpdate>, generation: u64, ok: bool, detail: &str) {
    let _ = applied_tx.send(AppliedUpdate {
        generation,
        ok,
        detail: detail.to_owned(),
    });
}

/// Fatal state: disconnected, but alive.  Waits for a selection change or
/// shutdown; a runtime resubscription is the way back.
async fn fatal_park(
    state_tx: &watch::Sender<ConnectionState>,
    selection_rx: &mut watch::Receiver<SelectionCmd>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    set_state(state_tx, ConnectionState::Disconnected);
    tokio::select! {
        _ = selection_rx.changed() => {}
        _ = shutdown_rx.changed() => {}
    }
}
