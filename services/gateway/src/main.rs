// feedgate: ingest a real-time social feed, filter and dedupe it, fan it
// out to the terminal, push-alert channels, and the dashboard socket.

use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gateway::config;
use gateway::sanitize::{self, SanitizingMakeWriter};

#[tokio::main]
async fn main() {
    // Log level: FEEDGATE_LOG wins, FEEDGATE_DEBUG=1 selects debug,
    // default is info.  Every line is routed through the sanitizer.
    let default_level = match std::env::var("FEEDGATE_DEBUG").ok().as_deref() {
        Some("1" | "true" | "yes" | "on") => "debug",
        _ => "info",
    };
    let filter = std::env::var("FEEDGATE_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(SanitizingMakeWriter::stdout())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "feedgate starting");

    let config_path =
        std::env::var("FEEDGATE_CONFIG").unwrap_or_else(|_| "feedgate.toml".to_owned());
    let cfg = match config::load_from_path(Path::new(&config_path), &config::process_env()) {
        Ok(cfg) => {
            info!(
                upstream = %cfg.upstream.base_url,
                channels = ?cfg.upstream.channels,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            std::process::exit(1);
        }
    };

    if cfg.log.file_logging {
        if let Err(e) = sanitize::attach_log_file(Path::new("feedgate.log")) {
            warn!(error = %e, "could not open feedgate.log; continuing without file logging");
        }
    }

    if let Err(e) = gateway::run(cfg).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}
