//! Gateway configuration loading.
//!
//! Merge order: built-in defaults, then the TOML file, then `FEEDGATE_*`
//! environment variables.  Secrets (upstream token, Telegram bot token,
//! Discord/webhook URLs) are read from the environment only; a secret that
//! appears in the file is stripped with a warning.
//!
//! Every loaded secret is registered with the log sanitizer before the
//! config is returned.
//!
//! Default config path: `./feedgate.toml` (override with `FEEDGATE_CONFIG`).

use fg_protocol::{Channel, EventKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::sanitize;

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

/// Fully-merged, validated gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub upstream: UpstreamSettings,
    pub filters: FilterSettings,
    /// Dedup cache TTL in seconds; 0 disables suppression.
    pub dedup_ttl_secs: u64,
    pub cli: CliSettings,
    pub broadcast: BroadcastSettings,
    pub alerts: AlertSettings,
    pub health_port: u16,
    pub log: LogSettings,
    /// How often the broadcast server recomputes its active-user list.
    pub active_user_refresh_secs: u64,
    /// Where this config was loaded from; `None` for defaults-plus-env.
    source_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub token: String,
    pub channels: Vec<Channel>,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    pub users: Vec<String>,
    pub keywords: Vec<String>,
    pub kinds: Vec<EventKind>,
}

#[derive(Debug, Clone)]
pub struct CliSettings {
    pub enabled: bool,
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub telegram: TelegramSettings,
    pub discord: DiscordSettings,
    pub webhook: WebhookSettings,
}

impl AlertSettings {
    pub fn any_enabled(&self) -> bool {
        self.telegram.enabled || self.discord.enabled || self.webhook.enabled
    }
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub url: String,
    /// "POST" or "PUT".
    pub method: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Copy sanitized log output to `feedgate.log`.  Off by default; a
    /// warning is emitted when enabled since log files grow unbounded.
    pub file_logging: bool,
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    upstream: Option<RawUpstream>,
    filters: Option<RawFilters>,
    dedup_ttl_secs: Option<u64>,
    cli: Option<RawCli>,
    broadcast: Option<RawBroadcast>,
    alerts: Option<RawAlerts>,
    health_port: Option<u16>,
    log: Option<RawLog>,
    active_user_refresh_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUpstream {
    base_url: Option<String>,
    /// Accepted but never honored: tokens belong in the environment.
    token: Option<String>,
    channels: Option<Vec<String>>,
    reconnect: Option<RawReconnect>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReconnect {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFilters {
    users: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    kinds: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCli {
    enabled: Option<bool>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBroadcast {
    enabled: Option<bool>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAlerts {
    rate_limit_max: Option<u32>,
    rate_limit_window_secs: Option<u64>,
    telegram: Option<RawTelegram>,
    discord: Option<RawDiscord>,
    webhook: Option<RawWebhook>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTelegram {
    enabled: Option<bool>,
    /// Stripped with a warning; the token comes from the environment.
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDiscord {
    enabled: Option<bool>,
    webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWebhook {
    enabled: Option<bool>,
    url: Option<String>,
    method: Option<String>,
    headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLog {
    file_logging: Option<bool>,
    debug: Option<bool>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing upstream token (set FEEDGATE_TOKEN)")]
    MissingToken,
    #[error("invalid upstream token: {0}")]
    InvalidToken(String),
    #[error("invalid URL for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: String, reason: String },
    #[error("no sink enabled; enable the CLI, the broadcast server, or an alert channel")]
    NoSinkEnabled,
    #[error("alert channel misconfigured: {0}")]
    AlertMisconfigured(String),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Environment snapshot used during loading; keyed by full variable name.
pub type EnvMap = HashMap<String, String>;

/// Capture the `FEEDGATE_*` variables from the process environment.
pub fn process_env() -> EnvMap {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("FEEDGATE_"))
        .collect()
}

/// Load from the given path (missing file is fine: defaults + env apply).
pub fn load_from_path(path: &Path, env: &EnvMap) -> Result<GatewayConfig, ConfigError> {
    let toml_str = match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(ConfigError::Io(format!(
                "reading config file '{}': {e}",
                path.display()
            )));
        }
    };
    let mut cfg = load_from_sources(toml_str.as_deref(), env)?;
    cfg.source_path = Some(path.to_path_buf());
    Ok(cfg)
}

/// Merge defaults, optional TOML text, and environment; validate; register
/// secrets with the sanitizer.
pub fn load_from_sources(
    toml_str: Option<&str>,
    env: &EnvMap,
) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = match toml_str {
        Some(s) => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?,
        None => RawConfig::default(),
    };

    let raw_upstream = raw.upstream.unwrap_or_default();
    if raw_upstream.token.is_some() {
        warn!("ignoring upstream token found in config file; tokens are environment-only");
    }

    let env_str = |key: &str| env.get(key).map(String::as_str);
    let env_owned = |key: &str| env.get(key).cloned();

    // --- upstream ---------------------------------------------------------
    let token = env_owned("FEEDGATE_TOKEN").ok_or(ConfigError::MissingToken)?;
    validate_token(&token)?;

    let base_url = env_owned("FEEDGATE_ACTOR_URL")
        .or(raw_upstream.base_url)
        .unwrap_or_else(|| "http://127.0.0.1:8787".to_owned());
    validate_url("upstream.base_url", &base_url)?;

    let channels = match env_str("FEEDGATE_CHANNELS") {
        Some(list) => parse_channels(&split_list(list))?,
        None => parse_channels(&raw_upstream.channels.unwrap_or_else(|| vec!["all".to_owned()]))?,
    };

    let raw_reconnect = raw_upstream.reconnect.unwrap_or_default();
    let reconnect = ReconnectSettings {
        initial_delay_ms: env_u64(env, "FEEDGATE_RECONNECT_INITIAL_MS")?
            .or(raw_reconnect.initial_delay_ms)
            .unwrap_or(1_000),
        max_delay_ms: env_u64(env, "FEEDGATE_RECONNECT_MAX_MS")?
            .or(raw_reconnect.max_delay_ms)
            .unwrap_or(30_000),
        multiplier: env_f64(env, "FEEDGATE_RECONNECT_MULTIPLIER")?
            .or(raw_reconnect.multiplier)
            .unwrap_or(2.0),
        max_attempts: env_u64(env, "FEEDGATE_RECONNECT_ATTEMPTS")?
            .map(|v| v as u32)
            .or(raw_reconnect.max_attempts)
            .unwrap_or(10),
    };
    if reconnect.initial_delay_ms == 0 {
        return Err(ConfigError::OutOfRange {
            field: "reconnect.initial_delay_ms".to_owned(),
            reason: "must be positive".to_owned(),
        });
    }
    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        return Err(ConfigError::OutOfRange {
            field: "reconnect.max_delay_ms".to_owned(),
            reason: "must be >= initial_delay_ms".to_owned(),
        });
    }
    if reconnect.multiplier < 1.0 {
        return Err(ConfigError::OutOfRange {
            field: "reconnect.multiplier".to_owned(),
            reason: "must be >= 1".to_owned(),
        });
    }
    if reconnect.max_attempts == 0 {
        return Err(ConfigError::OutOfRange {
            field: "reconnect.max_attempts".to_owned(),
            reason: "must be >= 1".to_owned(),
        });
    }

    // --- filters ----------------------------------------------------------
    let raw_filters = raw.filters.unwrap_or_default();
    let users = match env_str("FEEDGATE_USERS") {
        Some(list) => split_list(list),
        None => raw_filters.users.unwrap_or_default(),
    };
    let keywords = match env_str("FEEDGATE_KEYWORDS") {
        Some(list) => split_list(list),
        None => raw_filters.keywords.unwrap_or_default(),
    };
    let kinds = match env_str("FEEDGATE_KINDS") {
        Some(list) => parse_kinds(&split_list(list))?,
        None => parse_kinds(&raw_filters.kinds.unwrap_or_default())?,
    };

    // --- dedup ------------------------------------------------------------
    let dedup_ttl_secs = env_u64(env, "FEEDGATE_DEDUP_TTL_SECS")?
        .or(raw.dedup_ttl_secs)
        .unwrap_or(60);
    if dedup_ttl_secs > 300 {
        return Err(ConfigError::OutOfRange {
            field: "dedup_ttl_secs".to_owned(),
            reason: "must be within 0-300".to_owned(),
        });
    }

    // --- cli --------------------------------------------------------------
    let raw_cli = raw.cli.unwrap_or_default();
    let cli = CliSettings {
        enabled: env_bool(env, "FEEDGATE_CLI_ENABLED")?
            .or(raw_cli.enabled)
            .unwrap_or(true),
        stats_interval_secs: env_u64(env, "FEEDGATE_CLI_STATS_INTERVAL_SECS")?
            .or(raw_cli.stats_interval_secs)
            .unwrap_or(60),
    };
    if cli.stats_interval_secs == 0 {
        return Err(ConfigError::OutOfRange {
            field: "cli.stats_interval_secs".to_owned(),
            reason: "must be positive".to_owned(),
        });
    }

    // --- broadcast --------------------------------------------------------
    let raw_broadcast = raw.broadcast.unwrap_or_default();
    let broadcast = BroadcastSettings {
        enabled: env_bool(env, "FEEDGATE_BROADCAST_ENABLED")?
            .or(raw_broadcast.enabled)
            .unwrap_or(true),
        port: env_u64(env, "FEEDGATE_BROADCAST_PORT")?
            .map(|v| v as u16)
            .or(raw_broadcast.port)
            .unwrap_or(3000),
    };

    // --- alerts -----------------------------------------------------------
    let raw_alerts = raw.alerts.unwrap_or_default();
    let raw_telegram = raw_alerts.telegram.unwrap_or_default();
    if raw_telegram.bot_token.is_some() {
        warn!("ignoring Telegram bot token found in config file; tokens are environment-only");
    }
    let telegram = TelegramSettings {
        enabled: env_bool(env, "FEEDGATE_TELEGRAM_ENABLED")?
            .or(raw_telegram.enabled)
            .unwrap_or(false),
        bot_token: env_owned("FEEDGATE_TELEGRAM_BOT_TOKEN").unwrap_or_default(),
        chat_id: env_owned("FEEDGATE_TELEGRAM_CHAT_ID")
            .or(raw_telegram.chat_id)
            .unwrap_or_default(),
        api_base: env_owned("FEEDGATE_TELEGRAM_API_BASE")
            .or(raw_telegram.api_base)
            .unwrap_or_else(|| "https://api.telegram.org".to_owned()),
    };

    let raw_discord = raw_alerts.discord.unwrap_or_default();
    if raw_discord.webhook_url.is_some() {
        warn!("ignoring Discord webhook URL found in config file; secrets are environment-only");
    }
    let discord = DiscordSettings {
        enabled: env_bool(env, "FEEDGATE_DISCORD_ENABLED")?
            .or(raw_discord.enabled)
            .unwrap_or(false),
        webhook_url: env_owned("FEEDGATE_DISCORD_WEBHOOK_URL").unwrap_or_default(),
    };

    let raw_webhook = raw_alerts.webhook.unwrap_or_default();
    if raw_webhook.url.is_some() {
        warn!("ignoring webhook URL found in config file; secrets are environment-only");
    }
    let webhook = WebhookSettings {
        enabled: env_bool(env, "FEEDGATE_WEBHOOK_ENABLED")?
            .or(raw_webhook.enabled)
            .unwrap_or(false),
        url: env_owned("FEEDGATE_WEBHOOK_URL").unwrap_or_default(),
        method: env_owned("FEEDGATE_WEBHOOK_METHOD")
            .or(raw_webhook.method)
            .unwrap_or_else(|| "POST".to_owned())
            .to_uppercase(),
        headers: raw_webhook
            .headers
            .unwrap_or_default()
            .into_iter()
            .collect(),
    };

    let alerts = AlertSettings {
        rate_limit_max: env_u64(env, "FEEDGATE_ALERT_RATE_MAX")?
            .map(|v| v as u32)
            .or(raw_alerts.rate_limit_max)
            .unwrap_or(10),
        rate_limit_window_secs: env_u64(env, "FEEDGATE_ALERT_RATE_WINDOW_SECS")?
            .or(raw_alerts.rate_limit_window_secs)
            .unwrap_or(60),
        telegram,
        discord,
        webhook,
    };
    if alerts.rate_limit_max == 0 {
        return Err(ConfigError::OutOfRange {
            field: "alerts.rate_limit_max".to_owned(),
            reason: "must be >= 1".to_owned(),
        });
    }
    if alerts.rate_limit_window_secs == 0 {
        return Err(ConfigError::OutOfRange {
            field: "alerts.rate_limit_window_secs".to_owned(),
            reason: "must be positive".to_owned(),
        });
    }
    validate_alerts(&alerts)?;

    // --- health / log / misc ----------------------------------------------
    let health_port = env_u64(env, "FEEDGATE_HEALTH_PORT")?
        .map(|v| v as u16)
        .or(raw.health_port)
        .unwrap_or(3001);

    let raw_log = raw.log.unwrap_or_default();
    let log = LogSettings {
        file_logging: env_bool(env, "FEEDGATE_FILE_LOGGING")?
            .or(raw_log.file_logging)
            .unwrap_or(false),
        debug: env_bool(env, "FEEDGATE_DEBUG")?
            .or(raw_log.debug)
            .unwrap_or(false),
    };
    if log.file_logging {
        warn!("file logging enabled; feedgate.log grows without rotation");
    }

    let active_user_refresh_secs = env_u64(env, "FEEDGATE_ACTIVE_USER_REFRESH_SECS")?
        .or(raw.active_user_refresh_secs)
        .unwrap_or(300);

    let cfg = GatewayConfig {
        upstream: UpstreamSettings {
            base_url,
            token,
            channels,
            reconnect,
        },
        filters: FilterSettings {
            users,
            keywords,
            kinds,
        },
        dedup_ttl_secs,
        cli,
        broadcast,
        alerts,
        health_port,
        log,
        active_user_refresh_secs,
        source_path: None,
    };

    if !cfg.cli.enabled && !cfg.broadcast.enabled && !cfg.alerts.any_enabled() {
        return Err(ConfigError::NoSinkEnabled);
    }

    register_secrets(&cfg);
    Ok(cfg)
}

impl GatewayConfig {
    /// Re-read the file and environment this config came from.
    pub fn reload(&self) -> Result<GatewayConfig, ConfigError> {
        let env = process_env();
        match &self.source_path {
            Some(path) => load_from_path(path, &env),
            None => load_from_sources(None, &env),
        }
    }

    /// Dotted-key introspection for diagnostics.  Secrets are not exposed.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "upstream.base_url" => self.upstream.base_url.clone(),
            "upstream.channels" => self
                .upstream
                .channels
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "upstream.reconnect.initial_delay_ms" => {
                self.upstream.reconnect.initial_delay_ms.to_string()
            }
            "upstream.reconnect.max_delay_ms" => self.upstream.reconnect.max_delay_ms.to_string(),
            "upstream.reconnect.multiplier" => self.upstream.reconnect.multiplier.to_string(),
            "upstream.reconnect.max_attempts" => self.upstream.reconnect.max_attempts.to_string(),
            "filters.users" => self.filters.users.join(","),
            "filters.keywords" => self.filters.keywords.join(","),
            "filters.kinds" => self
                .filters
                .kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "dedup_ttl_secs" => self.dedup_ttl_secs.to_string(),
            "cli.enabled" => self.cli.enabled.to_string(),
            "cli.stats_interval_secs" => self.cli.stats_interval_secs.to_string(),
            "broadcast.enabled" => self.broadcast.enabled.to_string(),
            "broadcast.port" => self.broadcast.port.to_string(),
            "alerts.rate_limit_max" => self.alerts.rate_limit_max.to_string(),
            "alerts.rate_limit_window_secs" => self.alerts.rate_limit_window_secs.to_string(),
            "alerts.telegram.enabled" => self.alerts.telegram.enabled.to_string(),
            "alerts.discord.enabled" => self.alerts.discord.enabled.to_string(),
            "alerts.webhook.enabled" => self.alerts.webhook.enabled.to_string(),
            "alerts.webhook.method" => self.alerts.webhook.method.clone(),
            "health_port" => self.health_port.to_string(),
            "log.file_logging" => self.log.file_logging.to_string(),
            "log.debug" => self.log.debug.to_string(),
            "active_user_refresh_secs" => self.active_user_refresh_secs.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

const PLACEHOLDER_TOKENS: [&str; 2] = ["example_token", "test_token"];

fn validate_token(token: &str) -> Result<(), ConfigError> {
    if token.len() < 10 {
        return Err(ConfigError::InvalidToken(
            "must be at least 10 characters".to_owned(),
        ));
    }
    let lower = token.to_lowercase();
    if lower.contains("your") || lower.contains("placeholder") {
        return Err(ConfigError::InvalidToken(
            "looks like a placeholder".to_owned(),
        ));
    }
    if PLACEHOLDER_TOKENS.contains(&lower.as_str()) {
        return Err(ConfigError::InvalidToken(
            "looks like a placeholder".to_owned(),
        ));
    }
    Ok(())
}

fn validate_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_owned(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidUrl {
            field: field.to_owned(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    let lower = url.to_lowercase();
    if lower.contains("your") || lower.contains("placeholder") {
        return Err(ConfigError::InvalidUrl {
            field: field.to_owned(),
            reason: "looks like a placeholder".to_owned(),
        });
    }
    Ok(())
}

fn validate_alerts(alerts: &AlertSettings) -> Result<(), ConfigError> {
    if alerts.telegram.enabled {
        if alerts.telegram.bot_token.is_empty() {
            return Err(ConfigError::AlertMisconfigured(
                "telegram enabled without FEEDGATE_TELEGRAM_BOT_TOKEN".to_owned(),
            ));
        }
        if alerts.telegram.chat_id.is_empty() {
            return Err(ConfigError::AlertMisconfigured(
                "telegram enabled without a chat id".to_owned(),
            ));
        }
        validate_url("alerts.telegram.api_base", &alerts.telegram.api_base)?;
    }
    if alerts.discord.enabled {
        if alerts.discord.webhook_url.is_empty() {
            return Err(ConfigError::AlertMisconfigured(
                "discord enabled without FEEDGATE_DISCORD_WEBHOOK_URL".to_owned(),
            ));
        }
        validate_url("alerts.discord.webhook_url", &alerts.discord.webhook_url)?;
    }
    if alerts.webhook.enabled {
        if alerts.webhook.url.is_empty() {
            return Err(ConfigError::AlertMisconfigured(
                "webhook enabled without FEEDGATE_WEBHOOK_URL".to_owned(),
            ));
        }
        validate_url("alerts.webhook.url", &alerts.webhook.url)?;
        if alerts.webhook.method != "POST" && alerts.webhook.method != "PUT" {
            return Err(ConfigError::AlertMisconfigured(format!(
                "webhook method must be POST or PUT, got '{}'",
                alerts.webhook.method
            )));
        }
    }
    Ok(())
}

fn parse_channels(names: &[String]) -> Result<Vec<Channel>, ConfigError> {
    let mut channels = Vec::with_capacity(names.len());
    for name in names {
        let channel = Channel::parse(name.trim())
            .ok_or_else(|| ConfigError::UnknownChannel(name.clone()))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}

fn parse_kinds(names: &[String]) -> Result<Vec<EventKind>, ConfigError> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind =
            EventKind::parse(name.trim()).ok_or_else(|| ConfigError::UnknownKind(name.clone()))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn env_u64(env: &EnvMap, key: &str) -> Result<Option<u64>, ConfigError> {
    env.get(key)
        .map(|v| {
            v.parse().map_err(|_| ConfigError::OutOfRange {
                field: key.to_owned(),
                reason: format!("'{v}' is not a non-negative integer"),
            })
        })
        .transpose()
}

fn env_f64(env: &EnvMap, key: &str) -> Result<Option<f64>, ConfigError> {
    env.get(key)
        .map(|v| {
            v.parse().map_err(|_| ConfigError::OutOfRange {
                field: key.to_owned(),
                reason: format!("'{v}' is not a number"),
            })
        })
        .transpose()
}

fn env_bool(env: &EnvMap, key: &str) -> Result<Option<bool>, ConfigError> {
    env.get(key)
        .map(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::OutOfRange {
                field: key.to_owned(),
                reason: format!("'{other}' is not a boolean"),
            }),
        })
        .transpose()
}

fn register_secrets(cfg: &GatewayConfig) {
    sanitize::register_secret(&cfg.upstream.token);
    if !cfg.alerts.telegram.bot_token.is_empty() {
        sanitize::register_secret(&cfg.alerts.telegram.bot_token);
    }
    if !cfg.alerts.discord.webhook_url.is_empty() {
        sanitize::register_secret(&cfg.alerts.discord.webhook_url);
    }
    if !cfg.alerts.webhook.url.is_empty() {
        sanitize::register_secret(&cfg.alerts.webhook.url);
    }
}
