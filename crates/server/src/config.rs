//! Application configuration loaded from environment variables.

use std::time::Duration;

use cache::CacheConfig;
use jobs::JobsConfig;
use messaging::{BusConfig, ReconnectPolicy};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `BROKER_URL`, `BROKER_EXCHANGE`, `BROKER_CONNECT_TIMEOUT_SECS`,
///   `BROKER_MAX_RETRIES`, `BROKER_RECONNECT_INITIAL_SECS`,
///   `BROKER_RECONNECT_MAX_SECS`
/// - `DATABASE_URL`: enables the PostgreSQL failed-message store
/// - `JOBS_CONNECTION_STRING`, `JOBS_WORKER_COUNT`, `JOBS_POLL_INTERVAL_SECS`,
///   `JOBS_BATCH_TIMEOUT_SECS`, `JOBS_INVISIBILITY_TIMEOUT_SECS`,
///   `JOBS_FINISHED_RETENTION_SECS`
/// - `CACHE_CONNECTION_STRING`, `CACHE_INSTANCE_NAME`,
///   `CACHE_DEFAULT_EXPIRY_MINUTES`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub broker_url: String,
    pub broker_connect_timeout: Duration,
    pub database_url: Option<String>,
    pub bus: BusConfig,
    pub jobs: JobsConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`; unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| parse(key).map_or(default, Duration::from_secs);

        let mut bus = match lookup("BROKER_EXCHANGE") {
            Some(exchange) => BusConfig::with_exchange(exchange),
            None => defaults.bus,
        };
        if let Some(max_retries) = parse("BROKER_MAX_RETRIES") {
            bus = bus.with_max_retries(max_retries as u32);
        }
        let reconnect = ReconnectPolicy::new(
            secs("BROKER_RECONNECT_INITIAL_SECS", bus.reconnect.initial_delay),
            secs("BROKER_RECONNECT_MAX_SECS", bus.reconnect.max_delay),
        );
        bus = bus.with_reconnect(reconnect);

        let jobs = JobsConfig {
            connection_string: lookup("JOBS_CONNECTION_STRING")
                .unwrap_or(defaults.jobs.connection_string),
            worker_count: parse("JOBS_WORKER_COUNT")
                .map_or(defaults.jobs.worker_count, |n| n as usize),
            poll_interval: secs("JOBS_POLL_INTERVAL_SECS", defaults.jobs.poll_interval),
            batch_timeout: secs("JOBS_BATCH_TIMEOUT_SECS", defaults.jobs.batch_timeout),
            invisibility_timeout: secs(
                "JOBS_INVISIBILITY_TIMEOUT_SECS",
                defaults.jobs.invisibility_timeout,
            ),
            finished_retention: secs(
                "JOBS_FINISHED_RETENTION_SECS",
                defaults.jobs.finished_retention,
            ),
        };

        let cache = CacheConfig {
            connection_string: lookup("CACHE_CONNECTION_STRING")
                .unwrap_or(defaults.cache.connection_string),
            instance_name: lookup("CACHE_INSTANCE_NAME").unwrap_or(defaults.cache.instance_name),
            default_expiry: parse("CACHE_DEFAULT_EXPIRY_MINUTES")
                .map_or(defaults.cache.default_expiry, |m| Duration::from_secs(m * 60)),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            broker_url: lookup("BROKER_URL").unwrap_or(defaults.broker_url),
            broker_connect_timeout: secs(
                "BROKER_CONNECT_TIMEOUT_SECS",
                defaults.broker_connect_timeout,
            ),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            bus,
            jobs,
            cache,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            broker_url: "memory://".to_string(),
            broker_connect_timeout: messaging::connection::DEFAULT_CONNECT_TIMEOUT,
            database_url: None,
            bus: BusConfig::default(),
            jobs: JobsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
