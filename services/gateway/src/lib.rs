//! feedgate: ingest-and-fan-out gateway for a real-time social feed.
//!
//! Wires the upstream stream client, the normalization/filter/dedup
//! pipeline, and the sinks (terminal, push alerts, broadcast server)
//! together, and owns the process lifecycle around them.

pub mod alerts;
pub mod broadcast;
pub mod bus;
pub mod cli_sink;
pub mod config;
pub mod core;
pub mod dedup;
pub mod filter;
pub mod health;
pub mod rate_limit;
pub mod sanitize;
pub mod stats;
pub mod subscription;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::broadcast::{BroadcastServer, DashboardState, SubscriptionUpdateFn};
use crate::bus::{EventBus, TOPIC_ALERTS, TOPIC_CLI, TOPIC_DASHBOARD};
use crate::cli_sink::CliSink;
use crate::config::GatewayConfig;
use crate::core::StreamCore;
use crate::dedup::DedupCache;
use crate::filter::FilterChain;
use crate::health::{HealthServer, Readiness};
use crate::stats::Stats;
use crate::subscription::SubscriptionManager;
use crate::upstream::{ReconnectPolicy, UpstreamClient, UpstreamConfig};

/// Bounded drain applied to the pipeline and sink queues at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// A fully-wired gateway, running until [`Gateway::stop`].
pub struct Gateway {
    core: Arc<StreamCore>,
    cli: Option<Arc<CliSink>>,
    broadcast: Option<BroadcastServer>,
    health: HealthServer,
}

impl Gateway {
    /// Build and start every subsystem from config.
    ///
    /// Order matters: the health server comes up first (not ready), sinks
    /// subscribe before the pipeline starts so the first frame already
    /// fans out everywhere, and readiness flips only at the very end.
    pub async fn start(cfg: GatewayConfig) -> Result<Gateway, GatewayError> {
        let health = HealthServer::start(
            &format!("0.0.0.0:{}", cfg.health_port),
            Readiness::not_ready("starting".to_owned()),
        )
        .await?;

        let stats = Arc::new(Stats::new());
        let dedup = Arc::new(DedupCache::new());
        let filters = Arc::new(FilterChain::from_settings(&cfg.filters));
        let bus = Arc::new(EventBus::new());
        let subscription = Arc::new(SubscriptionManager::from_config(
            cfg.upstream.channels.clone(),
            cfg.filters.users.clone(),
        ));

        let initial = subscription.current();
        let (upstream, frame_rx) = UpstreamClient::start(
            UpstreamConfig {
                base_url: cfg.upstream.base_url.clone(),
                token: cfg.upstream.token.clone(),
                reconnect: ReconnectPolicy {
                    initial_delay: Duration::from_millis(cfg.upstream.reconnect.initial_delay_ms),
                    max_delay: Duration::from_millis(cfg.upstream.reconnect.max_delay_ms),
                    multiplier: cfg.upstream.reconnect.multiplier,
                    max_attempts: cfg.upstream.reconnect.max_attempts,
                },
            },
            initial.channels.clone(),
            initial.users.clone(),
        );

        let mut topics = Vec::new();
        if cfg.cli.enabled {
            topics.push(TOPIC_CLI);
        }
        if cfg.alerts.any_enabled() {
            topics.push(TOPIC_ALERTS);
        }
        if cfg.broadcast.enabled {
            topics.push(TOPIC_DASHBOARD);
        }

        let core = StreamCore::new(
            stats.clone(),
            dedup,
            filters.clone(),
            bus.clone(),
            subscription.clone(),
            Arc::new(upstream),
            Duration::from_secs(cfg.dedup_ttl_secs),
            topics,
        );

        // --- sinks, before the pipeline starts ---------------------------
        let cli = if cfg.cli.enabled {
            let sink = CliSink::new(
                stats.clone(),
                Duration::from_secs(cfg.cli.stats_interval_secs),
            );
            sink.start(&bus);
            Some(sink)
        } else {
            None
        };

        for runner in alerts::build_sinks(&cfg.alerts) {
            info!(sink = runner.name(), "alert sink enabled");
            bus.subscribe(TOPIC_ALERTS, move |event| {
                let runner = Arc::clone(&runner);
                async move {
                    runner.handle(event).await;
                }
            });
        }

        let broadcast = if cfg.broadcast.enabled {
            let update_fn: SubscriptionUpdateFn = {
                let core = Arc::clone(&core);
                Arc::new(move |channels, users| {
                    let core = Arc::clone(&core);
                    Box::pin(async move { core.update_subscription(channels, users).await })
                })
            };
            let dashboard = DashboardState::new(
                stats.clone(),
                subscription.clone(),
                filters.clone(),
                core.connection_state(),
                update_fn,
            );
            {
                let dashboard = Arc::clone(&dashboard);
                bus.subscribe(TOPIC_DASHBOARD, move |event| {
                    let dashboard = Arc::clone(&dashboard);
                    async move {
                        dashboard.ingest(event);
                    }
                });
            }
            let server =
                BroadcastServer::start(dashboard, &format!("0.0.0.0:{}", cfg.broadcast.port))
                    .await?;
            Some(server)
        } else {
            None
        };

        core.spawn_pipeline(frame_rx);

        // Periodic subscription visibility, on the configured cadence.
        {
            let subscription = subscription.clone();
            let period = Duration::from_secs(cfg.active_user_refresh_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let state = subscription.current();
                    debug!(
                        users = state.users.len(),
                        channels = ?state.channels,
                        "active subscription refresh"
                    );
                }
            });
        }

        health.set_readiness(Readiness::ready()).await;
        info!("feedgate running");

        Ok(Gateway {
            core,
            cli,
            broadcast,
            health,
        })
    }

    pub fn core(&self) -> &Arc<StreamCore> {
        &self.core
    }

    pub fn health_addr(&self) -> std::net::SocketAddr {
        self.health.local_addr()
    }

    pub fn broadcast_addr(&self) -> Option<std::net::SocketAddr> {
        self.broadcast.as_ref().map(BroadcastServer::local_addr)
    }

    /// Orderly shutdown: readiness off, upstream cancelled, queues drained
    /// bounded, servers stopped.
    pub async fn stop(self) {
        self.health
            .set_readiness(Readiness::not_ready("shutting down".to_owned()))
            .await;
        if let Some(cli) = &self.cli {
            cli.stop();
        }
        self.core.stop(SHUTDOWN_DRAIN).await;
        if let Some(broadcast) = &self.broadcast {
            broadcast.stop().await;
        }
        info!("feedgate stopped");
    }
}

/// Run until SIGTERM / Ctrl-C, then shut down in order.
pub async fn run(cfg: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::start(cfg).await?;
    shutdown_signal().await;
    gateway.stop().await;
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
