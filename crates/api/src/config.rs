//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::RetryPolicy;
use outbox::PublisherConfig;
use saga::{SagaConfig, SweeperConfig};

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
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `PAYMENT_GATEWAY_URL`: HTTP gateway base URL; unset uses the sandbox
/// - `PAYMENT_TIMEOUT_SECS`: payment deadline after creation (default: `900`)
/// - `GATEWAY_MAX_RETRIES`: retries for transient gateway failures (default: `3`)
/// - `SWEEP_INTERVAL_SECS`: reservation sweeper period (default: `30`)
/// - `PUBLISH_POLL_INTERVAL_MS`: idle outbox poll interval (default: `500`)
/// - `PUBLISH_BATCH_SIZE`: outbox events per pass (default: `100`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment_gateway_url: Option<String>,
    pub payment_timeout: Duration,
    pub gateway_max_retries: usize,
    pub sweep_interval: Duration,
    pub publish_poll_interval: Duration,
    pub publish_batch_size: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults, as do empty strings.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(get("PORT"), defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match get("LOG_FORMAT") {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                get("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            ),
            payment_gateway_url: get("PAYMENT_GATEWAY_URL"),
            payment_timeout: get("PAYMENT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            gateway_max_retries: parse_or(get("GATEWAY_MAX_RETRIES"), defaults.gateway_max_retries),
            sweep_interval: get("SWEEP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            publish_poll_interval: get("PUBLISH_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_poll_interval),
            publish_batch_size: parse_or(get("PUBLISH_BATCH_SIZE"), defaults.publish_batch_size)
                .max(1),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        let timeout_secs = i64::try_from(self.payment_timeout.as_secs()).unwrap_or(i64::MAX);
        SagaConfig::default()
            .with_payment_timeout(chrono::Duration::seconds(timeout_secs))
            .with_gateway_retry(RetryPolicy::default().with_max_retries(self.gateway_max_retries))
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.sweep_interval,
            ..SweeperConfig::default()
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            batch_size: self.publish_batch_size,
            poll_interval: self.publish_poll_interval,
            ..PublisherConfig::default()
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            payment_gateway_url: None,
            payment_timeout: Duration::from_secs(900),
            gateway_max_retries: 3,
            sweep_interval: Duration::from_secs(30),
            publish_poll_interval: Duration::from_millis(500),
            publish_batch_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.payment_gateway_url.is_none());
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/saga"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("PAYMENT_GATEWAY_URL", "http://gateway:9000"),
            ("PAYMENT_TIMEOUT_SECS", "60"),
            ("GATEWAY_MAX_RETRIES", "5"),
            ("SWEEP_INTERVAL_SECS", "10"),
            ("PUBLISH_POLL_INTERVAL_MS", "250"),
            ("PUBLISH_BATCH_SIZE", "50"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/saga")
        );
        assert_eq!(config.database_max_connections, 4);
        assert_eq!(
            config.payment_gateway_url.as_deref(),
            Some("http://gateway:9000")
        );
        assert_eq!(config.payment_timeout, Duration::from_secs(60));
        assert_eq!(config.gateway_max_retries, 5);
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.publish_poll_interval, Duration::from_millis(250));
        assert_eq!(config.publish_batch_size, 50);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("PUBLISH_BATCH_SIZE", "0"),
            ("DATABASE_URL", "  "),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.publish_batch_size, 1);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_derived_component_configs() {
        let config = from_pairs(&[
            ("PAYMENT_TIMEOUT_SECS", "120"),
            ("GATEWAY_MAX_RETRIES", "1"),
            ("PUBLISH_BATCH_SIZE", "7"),
        ]);

        let saga = config.saga_config();
        assert_eq!(saga.payment_timeout, chrono::Duration::seconds(120));
        assert_eq!(saga.gateway_retry.max_retries, Some(1));
        assert_eq!(config.publisher_config().batch_size, 7);
        assert_eq!(config.sweeper_config().interval, Duration::from_secs(30));
    }
}
