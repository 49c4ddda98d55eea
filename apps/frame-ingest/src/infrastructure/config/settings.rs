//! Ingest Configuration Settings
//!
//! Every option is a typed field with a default. Values come from
//! `FRAME_INGEST_*` environment variables or from key/value pairs; an
//! unrecognised key or an unparsable value is rejected when the
//! configuration is built, not when the option is first used.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::client::ClientOptions;
use crate::application::services::event_stream::EventStreamConfig;
use crate::application::services::pipeline::PipelineConfig;
use crate::application::services::reconnect::ReconnectConfig;

/// Prefix shared by every environment variable this crate reads.
pub const ENV_PREFIX: &str = "FRAME_INGEST_";

/// Remote engine connection and client behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Engine address as `host:port`.
    pub server: String,
    /// Per-request deadline and connect timeout.
    pub timeout: Duration,
    /// Number of gRPC channels used round-robin.
    pub pool_size: usize,
    /// Cap on simultaneously in-flight remote calls.
    pub max_concurrent: usize,
    /// Ceiling on bytes reassembled by a single collect.
    pub max_memory: usize,
    /// Default log filter.
    pub log_level: String,
    /// gRPC send and receive message limit.
    pub max_message_bytes: usize,
    /// HTTP/2 keep-alive ping interval.
    pub keepalive_interval: Duration,
    /// HTTP/2 keep-alive ping timeout.
    pub keepalive_timeout: Duration,
    /// Heartbeat drain window on close.
    pub shutdown_grace: Duration,
    /// Handle renewal interval.
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "localhost:50051".to_string(),
            timeout: Duration::from_secs(30),
            pool_size: 10,
            max_concurrent: 100,
            max_memory: 8 << 30,
            log_level: "info".to_string(),
            max_message_bytes: 100 << 20,
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Build from key/value pairs on top of the defaults. Keys are
    /// case-insensitive and may carry the `FRAME_INGEST_` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`] for keys that are not client
    /// options, or the parse error of the first bad value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let key = normalize_key(key.as_ref());
            if !config.apply(&key, value.as_ref())? {
                return Err(ConfigError::UnknownKey(key));
            }
        }
        Ok(config)
    }

    /// gRPC endpoint URI for the configured server.
    #[must_use]
    pub fn endpoint_uri(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("http://{}", self.server)
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "SERVER" => self.server = parse_server(key, value)?,
            "TIMEOUT_SECS" => self.timeout = parse_secs(key, value)?,
            "POOL_SIZE" => self.pool_size = parse_positive(key, value)?,
            "MAX_CONCURRENT" => self.max_concurrent = parse_positive(key, value)?,
            "MAX_MEMORY" => {
                self.max_memory =
                    parse_size(value).map_err(|reason| invalid(key, value, reason))?;
            }
            "LOG_LEVEL" => self.log_level = parse_log_level(key, value)?,
            "MAX_MESSAGE_BYTES" => {
                self.max_message_bytes =
                    parse_size(value).map_err(|reason| invalid(key, value, reason))?;
            }
            "KEEPALIVE_INTERVAL_SECS" => self.keepalive_interval = parse_secs(key, value)?,
            "KEEPALIVE_TIMEOUT_SECS" => self.keepalive_timeout = parse_secs(key, value)?,
            "SHUTDOWN_GRACE_SECS" => self.shutdown_grace = parse_secs(key, value)?,
            "HEARTBEAT_INTERVAL_SECS" => self.heartbeat_interval = parse_secs(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            shutdown_grace: config.shutdown_grace,
            heartbeat_interval: config.heartbeat_interval,
            max_collect_bytes: config.max_memory,
        }
    }
}

/// Event source connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// WebSocket URL of the event source.
    pub url: String,
    /// Consecutive failures before giving up (0 = never).
    pub max_retries: u32,
    /// First backoff delay.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Idle time before an application-level ping.
    pub recv_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            recv_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamSettings {
    fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "STREAM_URL" => {
                if !(value.starts_with("ws://") || value.starts_with("wss://")) {
                    return Err(invalid(key, value, "expected a ws:// or wss:// URL"));
                }
                self.url = value.to_string();
            }
            "STREAM_MAX_RETRIES" => self.max_retries = parse_num(key, value)?,
            "STREAM_BASE_DELAY_MS" => {
                self.base_delay = Duration::from_millis(parse_num(key, value)?);
            }
            "STREAM_MAX_DELAY_MS" => {
                self.max_delay = Duration::from_millis(parse_num(key, value)?);
            }
            "STREAM_RECV_TIMEOUT_SECS" => self.recv_timeout = parse_secs(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl From<&StreamSettings> for EventStreamConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::new(
                settings.base_delay,
                settings.max_delay,
                settings.max_retries,
            ),
            recv_timeout: settings.recv_timeout,
            ..Self::default()
        }
    }
}

/// Ingestion loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Rolling window capacity.
    pub window_size: usize,
    /// Events per flush.
    pub batch_size: usize,
    /// Statistics log cadence in events.
    pub log_every: u64,
    /// Latency sampling cadence in events.
    pub latency_every: u64,
    /// Per-symbol windows.
    pub per_symbol: bool,
    /// Cap on per-symbol windows.
    pub max_series: usize,
    /// Parquet sink directory on the engine host.
    pub sink_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_size: 1000,
            batch_size: 1000,
            log_every: 100,
            latency_every: 1000,
            per_symbol: false,
            max_series: 1024,
            sink_dir: None,
        }
    }
}

impl PipelineSettings {
    fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "WINDOW_SIZE" => self.window_size = parse_positive(key, value)?,
            "BATCH_SIZE" => self.batch_size = parse_positive(key, value)?,
            "LOG_EVERY" => self.log_every = parse_num(key, value)?,
            "LATENCY_EVERY" => self.latency_every = parse_num(key, value)?,
            "PER_SYMBOL" => self.per_symbol = parse_bool(key, value)?,
            "MAX_SERIES" => self.max_series = parse_positive(key, value)?,
            "SINK_DIR" => self.sink_dir = Some(PathBuf::from(value)),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Pipeline configuration, keeping flushed datasets alive at
    /// `keep_alive` when no sink is configured.
    #[must_use]
    pub fn to_pipeline_config(&self, keep_alive: Duration) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            window_size: self.window_size,
            log_every: self.log_every,
            latency_every: self.latency_every,
            per_symbol: self.per_symbol,
            max_series: self.max_series,
            sink_dir: self.sink_dir.clone(),
            keep_alive: self.sink_dir.is_none().then_some(keep_alive),
        }
    }
}

/// Local HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

impl ServerSettings {
    fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "HEALTH_PORT" => self.health_port = parse_num(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Complete configuration of the ingest binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestConfig {
    /// Remote engine client.
    pub client: ClientConfig,
    /// Event source.
    pub stream: StreamSettings,
    /// Ingestion loop.
    pub pipeline: PipelineSettings,
    /// Local HTTP server.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from `FRAME_INGEST_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown `FRAME_INGEST_*` variable or an
    /// invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_pairs(
            std::env::vars().filter(|(key, _)| key.to_ascii_uppercase().starts_with(ENV_PREFIX)),
        )
    }

    /// Build from key/value pairs on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`] or the parse error of the first
    /// bad value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let key = normalize_key(key.as_ref());
            let value = value.as_ref();
            let known = config.client.apply(&key, value)?
                || config.stream.apply(&key, value)?
                || config.pipeline.apply(&key, value)?
                || config.server.apply(&key, value)?;
            if !known {
                return Err(ConfigError::UnknownKey(key));
            }
        }
        Ok(config)
    }

    /// Event stream configuration.
    #[must_use]
    pub fn event_stream(&self) -> EventStreamConfig {
        EventStreamConfig::from(&self.stream)
    }

    /// Pipeline configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline
            .to_pipeline_config(self.client.heartbeat_interval)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Key is not a recognised option.
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    /// Value could not be parsed for its option.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: String,
    },

    /// Option was set to an empty value.
    #[error("configuration value {0} cannot be empty")]
    EmptyValue(String),
}

/// Parse a byte size such as `8GB`, `512MB`, `64kb` or `1048576`.
/// Units are binary multiples.
///
/// # Errors
///
/// Returns a description of the problem if the size is malformed.
pub fn parse_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: usize = digits
        .parse()
        .map_err(|_| "expected a number with an optional B/KB/MB/GB/TB unit".to_string())?;
    let shift = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        other => return Err(format!("unknown size unit {other:?}")),
    };
    amount
        .checked_mul(1usize << shift)
        .ok_or_else(|| "size overflows".to_string())
}

fn normalize_key(key: &str) -> String {
    let upper = key.trim().to_ascii_uppercase();
    upper
        .strip_prefix(ENV_PREFIX)
        .map_or_else(|| upper.clone(), str::to_string)
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn non_empty<'a>(key: &str, value: &'a str) -> Result<&'a str, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ConfigError::EmptyValue(key.to_string()))
    } else {
        Ok(trimmed)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    non_empty(key, value)?
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match parse_num::<usize>(key, value)? {
        0 => Err(invalid(key, value, "must be at least 1")),
        n => Ok(n),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_num(key, value).map(Duration::from_secs)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match non_empty(key, value)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_log_level(key: &str, value: &str) -> Result<String, ConfigError> {
    let level: tracing::Level = non_empty(key, value)?
        .parse()
        .map_err(|_| invalid(key, value, "expected trace, debug, info, warn or error"))?;
    Ok(level.as_str().to_ascii_lowercase())
}

fn parse_server(key: &str, value: &str) -> Result<String, ConfigError> {
    let server = non_empty(key, value)?;
    let authority = server
        .split_once("://")
        .map_or(server, |(_, rest)| rest)
        .trim_end_matches('/');
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(server.to_string())
        }
        _ => Err(invalid(key, value, "expected host:port")),
    }
}
